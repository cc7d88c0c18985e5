//! Fixed-schema records.
//!
//! A record is a map whose key set and key order are fixed by its
//! [`RecordFormat`]. It hashes and encodes as its own cell type, but reads
//! like a map with keyword keys.

use crate::cell::{Cell, CellMap};
use crate::error::{CellError, Result};
use crate::reference::Ref;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub struct RecordFormat {
    pub id: u8,
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

impl RecordFormat {
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| *k == key)
    }
}

impl PartialEq for RecordFormat {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordFormat {}

pub static TRANSACTION: RecordFormat = RecordFormat {
    id: 1,
    name: "transaction",
    keys: &["sequence", "command"],
};

pub static ACCOUNT_STATUS: RecordFormat = RecordFormat {
    id: 2,
    name: "account-status",
    keys: &["sequence", "environment"],
};

pub static RECEIPT: RecordFormat = RecordFormat {
    id: 3,
    name: "receipt",
    keys: &["value", "error", "juice"],
};

pub static FORMATS: [&RecordFormat; 3] = [&TRANSACTION, &ACCOUNT_STATUS, &RECEIPT];

pub fn format_for(id: u8) -> Option<&'static RecordFormat> {
    FORMATS.iter().copied().find(|f| f.id == id)
}

/// Keys accepted by record lookups: the keyword form of a format key.
fn key_name(key: &Cell) -> Option<&str> {
    match key {
        Cell::Keyword(k) => Some(k.as_str()),
        _ => None,
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    format: &'static RecordFormat,
    fields: Arc<IndexMap<&'static str, Ref>>,
}

impl Record {
    /// Values must be given in the format's key order.
    pub fn create(format: &'static RecordFormat, values: Vec<Ref>) -> Result<Self> {
        if values.len() != format.count() {
            return Err(CellError::InvalidStructure(format!(
                "{} takes {} values, got {}",
                format.name,
                format.count(),
                values.len()
            )));
        }
        Ok(Self::from_values(format, values))
    }

    /// For callers that build `values` from the format itself.
    pub(crate) fn from_values(format: &'static RecordFormat, values: Vec<Ref>) -> Self {
        debug_assert_eq!(values.len(), format.count());
        let fields = format.keys.iter().copied().zip(values).collect();
        Self {
            format,
            fields: Arc::new(fields),
        }
    }

    pub fn format(&self) -> &'static RecordFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &Cell) -> Option<&Ref> {
        self.get_field(key_name(key)?)
    }

    pub fn get_field(&self, name: &str) -> Option<&Ref> {
        self.fields.get(name)
    }

    pub fn get_entry(&self, key: &Cell) -> Option<(Cell, Ref)> {
        let (k, v) = self.fields.get_key_value(key_name(key)?)?;
        Some((Cell::keyword(*k), v.clone()))
    }

    /// Entry by position in format order.
    pub fn entry_at(&self, index: i64) -> Result<(Cell, Ref)> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.fields.get_index(i))
            .map(|(k, v)| (Cell::keyword(*k), v.clone()))
            .ok_or_else(|| CellError::bad_index(index, self.len()))
    }

    pub fn value_at(&self, i: usize) -> Option<&Ref> {
        self.fields.get_index(i).map(|(_, v)| v)
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = &Ref> {
        self.fields.values()
    }

    pub fn values_in_order(&self) -> Vec<Ref> {
        self.values().cloned().collect()
    }

    /// Replace all values. Returns `self` (sharing storage) when nothing
    /// changes.
    pub fn update_all(&self, values: Vec<Ref>) -> Result<Record> {
        if values.len() != self.len() {
            return Err(CellError::InvalidStructure(format!(
                "{} takes {} values, got {}",
                self.format.name,
                self.len(),
                values.len()
            )));
        }
        if self.values().zip(&values).all(|(a, b)| a == b) {
            return Ok(self.clone());
        }
        Record::create(self.format, values)
    }

    /// A record when `key` belongs to the format, otherwise the equivalent
    /// map with the extra entry.
    pub fn assoc(&self, key: Cell, value: Ref) -> Cell {
        let Some(i) = key_name(&key).and_then(|k| self.format.index_of(k)) else {
            let map = self.to_map().assoc_ref(Ref::new(key), value);
            return Cell::Map(map);
        };
        if self.values().nth(i) == Some(&value) {
            return Cell::Record(self.clone());
        }
        let mut values = self.values_in_order();
        values[i] = value;
        Cell::Record(Record::from_values(self.format, values))
    }

    pub fn to_map(&self) -> CellMap {
        self.fields.iter().fold(CellMap::new(), |m, (k, v)| {
            m.assoc_ref(Ref::new(Cell::keyword(*k)), v.clone())
        })
    }

    /// Inverse of [`Record::to_map`]. Absent keys become nil; keys outside
    /// the format are rejected.
    pub fn from_map(format: &'static RecordFormat, map: &CellMap) -> Result<Record> {
        let mut seen = 0;
        let mut values = Vec::with_capacity(format.count());
        for key in format.keys {
            match map.get(&Cell::keyword(*key)) {
                Some(v) => {
                    seen += 1;
                    values.push(v.clone());
                }
                None => values.push(Ref::nil()),
            }
        }
        if seen != map.len() {
            return Err(CellError::InvalidStructure(format!(
                "map has keys outside {}",
                format.name
            )));
        }
        Record::create(format, values)
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("format", &self.format.name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}{{", self.format.name)?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, ":{k} {v}")?;
        }
        f.write_str("}")
    }
}

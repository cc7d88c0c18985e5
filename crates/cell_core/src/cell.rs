use crate::encoding::{self, *};
use crate::error::{CellError, Result};
use crate::ops::Op;
use crate::record::Record;
use crate::reference::Ref;
use crate::signed::SignedData;
use cell_hash::Hash;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An immutable value. Identity is the BLAKE3 hash of [`Cell::encode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    Nil,
    Bool(bool),
    Long(i64),
    Str(String),
    Blob(Vec<u8>),
    Symbol(String),
    Keyword(String),
    Vector(Vec<Ref>),
    Map(CellMap),
    Syntax(Syntax),
    Signed(SignedData),
    Record(Record),
    Op(Op),
}

/// A value decorated with a metadata map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Syntax {
    pub value: Ref,
    pub meta: Ref,
}

impl Syntax {
    pub fn new(value: Ref, meta: CellMap) -> Self {
        Self {
            value,
            meta: Ref::new(Cell::Map(meta)),
        }
    }
}

impl Cell {
    pub fn symbol(name: impl Into<String>) -> Self {
        Cell::Symbol(name.into())
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Cell::Keyword(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Cell::Str(s.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Nil => "nil",
            Cell::Bool(_) => "bool",
            Cell::Long(_) => "long",
            Cell::Str(_) => "string",
            Cell::Blob(_) => "blob",
            Cell::Symbol(_) => "symbol",
            Cell::Keyword(_) => "keyword",
            Cell::Vector(_) => "vector",
            Cell::Map(_) => "map",
            Cell::Syntax(_) => "syntax",
            Cell::Signed(_) => "signed",
            Cell::Record(_) => "record",
            Cell::Op(_) => "op",
        }
    }

    /// `nil` and `false` are falsey, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Cell::Nil | Cell::Bool(false))
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Cell::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&CellMap> {
        match self {
            Cell::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encoding::encode(self)
    }

    pub fn hash(&self) -> Hash {
        cell_hash::blake3(&self.encode())
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Cell::Nil => out.push(NIL),
            Cell::Bool(b) => out.push(if *b { TRUE } else { FALSE }),
            Cell::Long(n) => {
                out.push(LONG);
                write_sleb(out, *n);
            }
            Cell::Str(s) => {
                out.push(STRING);
                write_bytes(out, s.as_bytes());
            }
            Cell::Blob(b) => {
                out.push(BLOB);
                write_bytes(out, b);
            }
            Cell::Symbol(s) => {
                out.push(SYMBOL);
                write_bytes(out, s.as_bytes());
            }
            Cell::Keyword(s) => {
                out.push(KEYWORD);
                write_bytes(out, s.as_bytes());
            }
            Cell::Vector(refs) => {
                out.push(VECTOR);
                write_refs(out, refs.iter());
            }
            Cell::Map(map) => {
                out.push(MAP);
                write_count(out, map.len());
                for (k, v) in map.iter() {
                    k.write(out);
                    v.write(out);
                }
            }
            Cell::Syntax(syn) => {
                out.push(SYNTAX);
                syn.value.write(out);
                syn.meta.write(out);
            }
            Cell::Signed(sd) => {
                out.push(SIGNED);
                out.extend_from_slice(sd.key().as_bytes());
                out.extend_from_slice(&sd.signature().to_bytes());
                sd.value_ref().write(out);
            }
            Cell::Record(rec) => {
                out.push(RECORD);
                out.push(rec.format().id);
                write_refs(out, rec.values());
            }
            Cell::Op(op) => {
                out.push(OP_BASE | op.opcode());
                op.write_raw(out);
            }
        }
    }

    /// Number of child references.
    pub fn ref_count(&self) -> usize {
        match self {
            Cell::Vector(refs) => refs.len(),
            Cell::Map(map) => map.len() * 2,
            Cell::Syntax(_) => 2,
            Cell::Signed(_) => 1,
            Cell::Record(rec) => rec.len(),
            Cell::Op(op) => op.ref_count(),
            _ => 0,
        }
    }

    /// Child reference `i`; maps interleave key and value refs in canonical
    /// order.
    pub fn get_ref(&self, i: usize) -> Result<&Ref> {
        let found = match self {
            Cell::Vector(refs) => refs.get(i),
            Cell::Map(map) => map.entry_at(i / 2).map(|(k, v)| if i % 2 == 0 { k } else { v }),
            Cell::Syntax(syn) => match i {
                0 => Some(&syn.value),
                1 => Some(&syn.meta),
                _ => None,
            },
            Cell::Signed(sd) => (i == 0).then(|| sd.value_ref()),
            Cell::Record(rec) => rec.value_at(i),
            Cell::Op(op) => return op.get_ref(i),
            _ => None,
        };
        found.ok_or_else(|| CellError::bad_index(i, self.ref_count()))
    }

    /// Every child reference in `get_ref` order, without per-index lookups.
    pub fn child_refs(&self) -> Vec<&Ref> {
        match self {
            Cell::Vector(refs) => refs.iter().collect(),
            Cell::Map(map) => map.iter().flat_map(|(k, v)| [k, v]).collect(),
            Cell::Syntax(syn) => vec![&syn.value, &syn.meta],
            Cell::Signed(sd) => vec![sd.value_ref()],
            Cell::Record(rec) => rec.values().collect(),
            Cell::Op(op) => (0..op.ref_count()).filter_map(|i| op.get_ref(i).ok()).collect(),
            _ => Vec::new(),
        }
    }

    /// Rebuild this cell with every child ref passed through `f`.
    ///
    /// `f` must return refs to semantically equal values, so the result has
    /// the same hash as `self`.
    pub fn update_refs(&self, f: &mut dyn FnMut(&Ref) -> Result<Ref>) -> Result<Cell> {
        Ok(match self {
            Cell::Vector(refs) => Cell::Vector(refs.iter().map(|r| f(r)).collect::<Result<_>>()?),
            Cell::Map(map) => {
                let mut out = CellMap::new();
                for (k, v) in map.iter() {
                    out = out.assoc_ref(f(k)?, f(v)?);
                }
                Cell::Map(out)
            }
            Cell::Syntax(syn) => Cell::Syntax(Syntax {
                value: f(&syn.value)?,
                meta: f(&syn.meta)?,
            }),
            Cell::Signed(sd) => Cell::Signed(sd.with_value(f(sd.value_ref())?)),
            Cell::Record(rec) => {
                // rebuilt even when equal, so resolved children are kept
                let values = rec.values().map(|r| f(r)).collect::<Result<Vec<_>>>()?;
                Cell::Record(Record::from_values(rec.format(), values))
            }
            Cell::Op(op) => Cell::Op(op.update_refs(f)?),
            other => other.clone(),
        })
    }
}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(Cell::hash(self).as_bytes());
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Long(n)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Str(s.to_owned())
    }
}

impl From<Record> for Cell {
    fn from(r: Record) -> Self {
        Cell::Record(r)
    }
}

impl From<Op> for Cell {
    fn from(op: Op) -> Self {
        Cell::Op(op)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Nil => f.write_str("nil"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Long(n) => write!(f, "{n}"),
            Cell::Str(s) => write!(f, "{s:?}"),
            Cell::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            Cell::Symbol(s) => f.write_str(s),
            Cell::Keyword(s) => write!(f, ":{s}"),
            Cell::Vector(refs) => {
                f.write_str("[")?;
                for (i, r) in refs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{r}")?;
                }
                f.write_str("]")
            }
            Cell::Map(map) => write!(f, "{map}"),
            Cell::Syntax(syn) => write!(f, "^{} {}", syn.meta, syn.value),
            Cell::Signed(sd) => write!(f, "#signed {{:key {} :value {}}}", sd.key(), sd.value_ref()),
            Cell::Record(rec) => write!(f, "{rec}"),
            Cell::Op(op) => write!(f, "{op}"),
        }
    }
}

/// Immutable map ordered by the hash of each key.
///
/// Updates copy the backing tree on write; clones share it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellMap {
    entries: Arc<BTreeMap<Hash, (Ref, Ref)>>,
}

impl CellMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Cell) -> Option<&Ref> {
        self.get_by_hash(&key.hash())
    }

    pub fn get_by_hash(&self, key_hash: &Hash) -> Option<&Ref> {
        self.entries.get(key_hash).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Cell) -> bool {
        self.entries.contains_key(&key.hash())
    }

    pub fn assoc(&self, key: Cell, value: Cell) -> CellMap {
        self.assoc_ref(Ref::new(key), Ref::new(value))
    }

    pub fn assoc_ref(&self, key: Ref, value: Ref) -> CellMap {
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).insert(key.hash(), (key, value));
        next
    }

    pub fn dissoc(&self, key: &Cell) -> CellMap {
        let kh = key.hash();
        if !self.entries.contains_key(&kh) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).remove(&kh);
        next
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Ref, &Ref)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn entry_at(&self, i: usize) -> Option<(&Ref, &Ref)> {
        self.entries.values().nth(i).map(|(k, v)| (k, v))
    }

    pub fn ptr_eq(&self, other: &CellMap) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Display for CellMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k} {v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_vec(n: i64) -> Cell {
        Cell::Vector((0..n).map(|i| Ref::new(Cell::Long(i))).collect())
    }

    #[test]
    fn hash_is_stable_and_content_based() {
        let a = Cell::string("hello");
        let b = Cell::string("hello");
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), Cell::Symbol("hello".into()).hash());
        assert_ne!(Cell::Nil.hash(), Cell::Bool(false).hash());
    }

    #[test]
    fn map_is_ordered_by_key_hash() {
        let mut m = CellMap::new();
        for i in 0..20 {
            m = m.assoc(Cell::Long(i), Cell::Long(i * 10));
        }
        assert_eq!(m.len(), 20);
        let hashes: Vec<Hash> = m.iter().map(|(k, _)| k.hash()).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
        assert_eq!(m.get(&Cell::Long(7)).unwrap().value().unwrap().as_long(), Some(70));

        // insertion order does not affect identity
        let mut rev = CellMap::new();
        for i in (0..20).rev() {
            rev = rev.assoc(Cell::Long(i), Cell::Long(i * 10));
        }
        assert_eq!(Cell::Map(m.clone()).hash(), Cell::Map(rev).hash());

        let smaller = m.dissoc(&Cell::Long(7));
        assert_eq!(smaller.len(), 19);
        assert_eq!(m.len(), 20);
        assert!(m.dissoc(&Cell::Long(99)).ptr_eq(&m));
    }

    #[test]
    fn traversal_covers_every_child() {
        let v = long_vec(3);
        assert_eq!(v.ref_count(), 3);
        assert_eq!(v.get_ref(2).unwrap().value().unwrap().as_long(), Some(2));
        assert!(matches!(
            v.get_ref(3),
            Err(CellError::IndexOutOfRange { index: 3, len: 3 })
        ));

        let m = Cell::Map(CellMap::new().assoc(Cell::keyword("k"), Cell::Long(1)));
        assert_eq!(m.ref_count(), 2);
        assert_eq!(m.get_ref(0).unwrap().value().unwrap().as_ref(), &Cell::keyword("k"));
        assert_eq!(m.get_ref(1).unwrap().value().unwrap().as_long(), Some(1));
        assert_eq!(Cell::Long(5).ref_count(), 0);
        assert!(Cell::Long(5).get_ref(0).is_err());

        let mut big = CellMap::new();
        for i in 0..500 {
            big = big.assoc(Cell::Long(i), Cell::Long(-i));
        }
        let big = Cell::Map(big);
        let children = big.child_refs();
        assert_eq!(children.len(), big.ref_count());
        for (i, child) in children.iter().enumerate().step_by(97) {
            assert_eq!(*child, big.get_ref(i).unwrap());
        }
    }

    #[test]
    fn update_refs_preserves_identity() {
        let v = long_vec(4);
        let mut seen = 0;
        let rebuilt = v
            .update_refs(&mut |r| {
                seen += 1;
                Ok(Ref::new(r.value().unwrap().as_ref().clone()))
            })
            .unwrap();
        assert_eq!(seen, 4);
        assert_eq!(rebuilt, v);
        assert_eq!(rebuilt.hash(), v.hash());
    }

    #[test]
    fn embedded_and_stored_children_decode_equal() {
        let small = Ref::new(Cell::Long(1));
        let large = Ref::new(Cell::Blob(vec![3u8; 300]));
        assert!(small.is_embedded());
        assert!(!large.is_embedded());
        let v = Cell::Vector(vec![small, large]);
        let back = encoding::decode(&v.encode()).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.hash(), v.hash());
    }

    #[test]
    fn truthiness() {
        assert!(!Cell::Nil.is_truthy());
        assert!(!Cell::Bool(false).is_truthy());
        assert!(Cell::Long(0).is_truthy());
        assert!(Cell::Vector(vec![]).is_truthy());
    }

    #[test]
    fn displays_as_edn() {
        let v = Cell::Vector(vec![
            Ref::new(Cell::Long(1)),
            Ref::new(Cell::keyword("a")),
            Ref::new(Cell::string("s")),
            Ref::new(Cell::Nil),
        ]);
        assert_eq!(v.to_string(), "[1 :a \"s\" nil]");
    }
}

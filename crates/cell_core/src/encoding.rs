//! Canonical binary encoding.
//!
//! Every cell starts with a tag byte. Children are written through
//! [`Ref::write`]: inline when their own encoding is at most
//! [`MAX_EMBEDDED_LENGTH`] bytes, otherwise as `REF` followed by the 32-byte
//! hash. Counts and lengths are minimal unsigned LEB128, longs are minimal
//! signed LEB128. Anything else is rejected as a format error, so a given
//! value has exactly one encoding and therefore one hash.

use crate::cell::{Cell, CellMap, Syntax};
use crate::crypto::{AccountKey, Signature};
use crate::error::{CellError, Result};
use crate::ops::Op;
use crate::record::{format_for, Record};
use crate::reference::Ref;
use crate::signed::SignedData;
use cell_hash::{Hash, HASH_LEN};

pub const NIL: u8 = 0x00;
pub const LONG: u8 = 0x10;
pub const REF: u8 = 0x20;
pub const STRING: u8 = 0x30;
pub const BLOB: u8 = 0x31;
pub const SYMBOL: u8 = 0x32;
pub const KEYWORD: u8 = 0x33;
pub const VECTOR: u8 = 0x80;
pub const MAP: u8 = 0x82;
pub const SYNTAX: u8 = 0x88;
pub const SIGNED: u8 = 0x90;
pub const RECORD: u8 = 0xA0;
pub const FALSE: u8 = 0xB0;
pub const TRUE: u8 = 0xB1;
/// Ops occupy `OP_BASE | opcode`.
pub const OP_BASE: u8 = 0xC0;
const OP_MASK: u8 = 0xF0;

/// Largest encoding that is inlined in its parent.
pub const MAX_EMBEDDED_LENGTH: usize = 140;

pub fn encode(cell: &Cell) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    cell.write(&mut out);
    out
}

/// Decode exactly one cell from `bytes`; trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<Cell> {
    let mut dec = Decoder::new(bytes);
    let cell = dec.read_cell()?;
    dec.finish()?;
    Ok(cell)
}

// Writes into a Vec cannot fail.
pub fn write_uleb(out: &mut Vec<u8>, value: u64) {
    let _ = leb128::write::unsigned(out, value);
}

pub fn write_sleb(out: &mut Vec<u8>, value: i64) {
    let _ = leb128::write::signed(out, value);
}

pub fn write_count(out: &mut Vec<u8>, count: usize) {
    write_uleb(out, count as u64);
}

/// Length-prefixed byte string.
pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_count(out, bytes.len());
    out.extend_from_slice(bytes);
}

pub fn write_refs<'a>(out: &mut Vec<u8>, refs: impl ExactSizeIterator<Item = &'a Ref>) {
    write_count(out, refs.len());
    for r in refs {
        r.write(out);
    }
}

pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(CellError::format(format!(
                "{} trailing bytes after cell",
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| CellError::format("unexpected end of input"))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(CellError::format(format!(
                "need {len} bytes, {} left",
                self.remaining()
            )));
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_slice(N)?);
        Ok(arr)
    }

    pub fn read_uleb(&mut self) -> Result<u64> {
        let mut rest = &self.buf[self.pos..];
        let before = rest.len();
        let value = leb128::read::unsigned(&mut rest)
            .map_err(|e| CellError::format(format!("bad varint: {e}")))?;
        let used = before - rest.len();
        let mut canonical = Vec::with_capacity(used);
        write_uleb(&mut canonical, value);
        if canonical.len() != used {
            return Err(CellError::format("non-minimal varint"));
        }
        self.pos += used;
        Ok(value)
    }

    pub fn read_sleb(&mut self) -> Result<i64> {
        let mut rest = &self.buf[self.pos..];
        let before = rest.len();
        let value = leb128::read::signed(&mut rest)
            .map_err(|e| CellError::format(format!("bad varint: {e}")))?;
        let used = before - rest.len();
        let mut canonical = Vec::with_capacity(used);
        write_sleb(&mut canonical, value);
        if canonical.len() != used {
            return Err(CellError::format("non-minimal varint"));
        }
        self.pos += used;
        Ok(value)
    }

    /// An element count; never more than the bytes left, since every element
    /// takes at least one byte.
    pub fn read_count(&mut self) -> Result<usize> {
        let n = self.read_uleb()?;
        if n > self.remaining() as u64 {
            return Err(CellError::format(format!(
                "count {n} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        Ok(n as usize)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_count()?;
        self.read_slice(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| CellError::format(format!("invalid utf-8: {e}")))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        Ok(Hash::from_array(self.read_array::<HASH_LEN>()?))
    }

    /// A child slot: either `REF` + hash, or an inline cell small enough to be
    /// embedded.
    pub fn read_ref(&mut self) -> Result<Ref> {
        if self.peek_u8()? == REF {
            self.pos += 1;
            return Ok(Ref::for_hash(self.read_hash()?));
        }
        // Every inline level costs at least two bytes of its parent's budget.
        if self.depth > MAX_EMBEDDED_LENGTH {
            return Err(CellError::format("inline nesting too deep"));
        }
        let start = self.pos;
        self.depth += 1;
        let cell = self.read_cell();
        self.depth -= 1;
        let cell = cell?;
        let bytes = &self.buf[start..self.pos];
        if bytes.len() > MAX_EMBEDDED_LENGTH {
            return Err(CellError::format(format!(
                "inline child of {} bytes exceeds embedding limit",
                bytes.len()
            )));
        }
        Ok(Ref::decoded(cell, bytes.to_vec()))
    }

    pub fn read_refs(&mut self) -> Result<Vec<Ref>> {
        let n = self.read_count()?;
        let mut refs = Vec::with_capacity(n);
        for _ in 0..n {
            refs.push(self.read_ref()?);
        }
        Ok(refs)
    }

    pub fn read_cell(&mut self) -> Result<Cell> {
        let tag = self.read_u8()?;
        let cell = match tag {
            NIL => Cell::Nil,
            FALSE => Cell::Bool(false),
            TRUE => Cell::Bool(true),
            LONG => Cell::Long(self.read_sleb()?),
            STRING => Cell::Str(self.read_string()?),
            BLOB => Cell::Blob(self.read_bytes()?.to_vec()),
            SYMBOL => Cell::Symbol(self.read_string()?),
            KEYWORD => Cell::Keyword(self.read_string()?),
            VECTOR => Cell::Vector(self.read_refs()?),
            MAP => Cell::Map(self.read_map()?),
            SYNTAX => {
                let value = self.read_ref()?;
                let meta = self.read_ref()?;
                Cell::Syntax(Syntax { value, meta })
            }
            SIGNED => {
                let key = AccountKey::from_bytes(self.read_array()?);
                let signature = Signature::from_bytes(self.read_array()?);
                let value = self.read_ref()?;
                Cell::Signed(SignedData::create(key, signature, value))
            }
            RECORD => {
                let id = self.read_u8()?;
                let format = format_for(id)
                    .ok_or_else(|| CellError::format(format!("unknown record format {id}")))?;
                let values = self.read_refs()?;
                if values.len() != format.keys.len() {
                    return Err(CellError::format(format!(
                        "record {} expects {} fields, got {}",
                        format.name,
                        format.keys.len(),
                        values.len()
                    )));
                }
                Cell::Record(Record::create(format, values)?)
            }
            REF => return Err(CellError::format("REF tag where a cell was expected")),
            t if t & OP_MASK == OP_BASE => Cell::Op(Op::read(t & !OP_MASK, self)?),
            t => return Err(CellError::format(format!("unknown tag 0x{t:02x}"))),
        };
        Ok(cell)
    }

    fn read_map(&mut self) -> Result<CellMap> {
        let n = self.read_count()?;
        let mut map = CellMap::new();
        let mut last: Option<Hash> = None;
        for _ in 0..n {
            let key = self.read_ref()?;
            let value = self.read_ref()?;
            let kh = key.hash();
            if last.is_some_and(|prev| prev >= kh) {
                return Err(CellError::format("map keys not in canonical order"));
            }
            last = Some(kh);
            map = map.assoc_ref(key, value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_decode_to_themselves() {
        for cell in [
            Cell::Nil,
            Cell::Bool(true),
            Cell::Bool(false),
            Cell::Long(0),
            Cell::Long(-1),
            Cell::Long(i64::MAX),
            Cell::Long(i64::MIN),
            Cell::Str("héllo".into()),
            Cell::Blob(vec![0, 1, 2, 255]),
            Cell::Symbol("x".into()),
            Cell::Keyword("sequence".into()),
        ] {
            let bytes = encode(&cell);
            assert_eq!(decode(&bytes).unwrap(), cell);
        }
    }

    #[test]
    fn known_layouts() {
        assert_eq!(encode(&Cell::Nil), vec![NIL]);
        assert_eq!(encode(&Cell::Long(1)), vec![LONG, 0x01]);
        assert_eq!(encode(&Cell::Long(-1)), vec![LONG, 0x7f]);
        assert_eq!(encode(&Cell::Str("ab".into())), vec![STRING, 2, b'a', b'b']);
        assert_eq!(
            encode(&Cell::Vector(vec![Ref::new(Cell::Nil)])),
            vec![VECTOR, 1, NIL]
        );
    }

    #[test]
    fn large_children_are_written_by_hash() {
        let big = Cell::Blob(vec![9u8; 500]);
        let child = Ref::new(big);
        let bytes = encode(&Cell::Vector(vec![child.clone()]));
        assert_eq!(bytes.len(), 2 + 1 + HASH_LEN);
        assert_eq!(bytes[2], REF);
        assert_eq!(&bytes[3..], child.hash().as_bytes());

        let back = decode(&bytes).unwrap();
        let r = back.get_ref(0).unwrap();
        assert!(!r.is_resolved());
        assert_eq!(r.hash(), child.hash());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x7e]).is_err(), "unknown tag");
        assert!(decode(&[NIL, NIL]).is_err(), "trailing bytes");
        assert!(decode(&[LONG, 0x81, 0x00]).is_err(), "non-minimal varint");
        assert!(decode(&[STRING, 5, b'a']).is_err(), "short string");
        assert!(decode(&[STRING, 1, 0xff]).is_err(), "bad utf-8");
        assert!(decode(&[REF]).is_err());
        assert!(decode(&[RECORD, 99, 0]).is_err(), "unknown record format");
        assert!(decode(&[RECORD, 1, 1, NIL]).is_err(), "field count");
        assert!(decode(&[VECTOR, 100, NIL]).is_err(), "count beyond input");
    }

    #[test]
    fn rejects_oversized_inline_child() {
        let big = encode(&Cell::Blob(vec![1u8; 200]));
        let mut bytes = vec![VECTOR, 1];
        bytes.extend_from_slice(&big);
        assert!(matches!(decode(&bytes), Err(CellError::Format(_))));
    }

    #[test]
    fn rejects_unsorted_map_keys() {
        let a = Cell::Keyword("a".into());
        let b = Cell::Keyword("b".into());
        let (lo, hi) = if a.hash() < b.hash() { (a, b) } else { (b, a) };
        let mut good = vec![MAP, 2];
        for k in [&lo, &hi] {
            good.extend(encode(k));
            good.push(NIL);
        }
        assert!(decode(&good).is_ok());

        let mut bad = vec![MAP, 2];
        for k in [&hi, &lo] {
            bad.extend(encode(k));
            bad.push(NIL);
        }
        assert!(decode(&bad).is_err());

        let mut dup = vec![MAP, 2];
        for k in [&lo, &lo] {
            dup.extend(encode(k));
            dup.push(NIL);
        }
        assert!(decode(&dup).is_err());
    }
}

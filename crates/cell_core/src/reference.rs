//! Handles to cells that may or may not be in memory.
//!
//! A [`Ref`] always knows the hash of its target, or can derive it from the
//! value it holds. The value is loaded from a [`Store`] at most once and is
//! immutable afterwards, so refs are freely shared between parents and
//! threads.

use crate::cell::Cell;
use crate::encoding::{MAX_EMBEDDED_LENGTH, REF};
use crate::error::{CellError, Result};
use crate::store::Store;
use cell_hash::Hash;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes fetched from a store hashed to the requested hash.
pub const VERIFIED: u8 = 0x01;
/// Derived from a failed signature check on an enclosing envelope.
pub const BAD: u8 = 0x04;

#[derive(Clone)]
pub struct Ref(Arc<RefInner>);

struct RefInner {
    hash: OnceCell<Hash>,
    value: OnceCell<Arc<Cell>>,
    encoding: OnceCell<Vec<u8>>,
    flags: AtomicU8,
}

impl RefInner {
    fn empty() -> Self {
        Self {
            hash: OnceCell::new(),
            value: OnceCell::new(),
            encoding: OnceCell::new(),
            flags: AtomicU8::new(0),
        }
    }
}

impl Ref {
    pub fn new(cell: Cell) -> Self {
        Self::from_arc(Arc::new(cell))
    }

    pub fn from_arc(cell: Arc<Cell>) -> Self {
        let inner = RefInner::empty();
        let _ = inner.value.set(cell);
        Ref(Arc::new(inner))
    }

    /// An unresolved ref to a stored cell larger than the embedding limit.
    /// The value is fetched on [`Ref::resolve`]; top-level cells of any size
    /// go through [`Ref::load`] instead.
    pub fn for_hash(hash: Hash) -> Self {
        let inner = RefInner::empty();
        let _ = inner.hash.set(hash);
        Ref(Arc::new(inner))
    }

    pub fn nil() -> Self {
        Self::new(Cell::Nil)
    }

    /// A cell read inline from a parent, with its exact bytes.
    pub(crate) fn decoded(cell: Cell, bytes: Vec<u8>) -> Self {
        let inner = RefInner::empty();
        let _ = inner.value.set(Arc::new(cell));
        let _ = inner.encoding.set(bytes);
        Ref(Arc::new(inner))
    }

    /// A resolved ref standing in for `original`, whose hash and flags it
    /// inherits. `cell` must be semantically equal to the original target.
    pub(crate) fn from_resolved(cell: Cell, original: &Ref) -> Self {
        let inner = RefInner::empty();
        let _ = inner.value.set(Arc::new(cell));
        let _ = inner.hash.set(original.hash());
        inner.flags.store(original.flags(), Ordering::Release);
        Ref(Arc::new(inner))
    }

    pub fn hash(&self) -> Hash {
        *self.0.hash.get_or_init(|| match self.encoding() {
            Some(bytes) => cell_hash::blake3(bytes),
            // every constructor sets a value or a hash
            None => Hash::ZERO,
        })
    }

    pub fn value(&self) -> Option<&Arc<Cell>> {
        self.0.value.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.value.get().is_some()
    }

    /// Canonical encoding of the target, when it is in memory.
    pub fn encoding(&self) -> Option<&[u8]> {
        let cell = self.0.value.get()?;
        Some(self.0.encoding.get_or_init(|| cell.encode()).as_slice())
    }

    /// Whether a parent writes this child inline. Unresolved refs are always
    /// written by hash.
    pub fn is_embedded(&self) -> bool {
        self.encoding()
            .is_some_and(|bytes| bytes.len() <= MAX_EMBEDDED_LENGTH)
    }

    /// Load the target from `store` if it is not already in memory.
    ///
    /// Absent bytes (or a store failure) are missing data. Bytes that do not
    /// hash to this ref's hash, or do not decode, are a format error. So are
    /// bytes short enough to embed: a cell that small is always written
    /// inline, so no parent can legitimately name it by hash.
    pub fn resolve(&self, store: &dyn Store) -> Result<Arc<Cell>> {
        if let Some(cell) = self.0.value.get() {
            return Ok(cell.clone());
        }
        let hash = self.hash();
        let (cell, bytes) = fetch(hash, store)?;
        if bytes.len() <= MAX_EMBEDDED_LENGTH {
            warn!(%hash, len = bytes.len(), "embeddable cell referenced by hash");
            return Err(CellError::format(format!(
                "{hash} is {} bytes and must be embedded",
                bytes.len()
            )));
        }
        let _ = self.0.encoding.set(bytes);
        let cell = self.0.value.get_or_init(|| Arc::new(cell)).clone();
        self.set_flag(VERIFIED);
        Ok(cell)
    }

    /// Load a top-level cell of any size into a fresh, verified ref.
    pub fn load(hash: Hash, store: &dyn Store) -> Result<Ref> {
        let (cell, bytes) = fetch(hash, store)?;
        let loaded = Ref::decoded(cell, bytes);
        let _ = loaded.0.hash.set(hash);
        loaded.set_flag(VERIFIED);
        Ok(loaded)
    }

    /// Write this child into a parent encoding.
    pub fn write(&self, out: &mut Vec<u8>) {
        match self.encoding() {
            Some(bytes) if bytes.len() <= MAX_EMBEDDED_LENGTH => out.extend_from_slice(bytes),
            _ => {
                out.push(REF);
                out.extend_from_slice(self.hash().as_bytes());
            }
        }
    }

    /// Store the target and every in-memory descendant that its parent writes
    /// by hash. The target itself is always stored, even when small.
    pub fn persist(&self, store: &dyn Store) -> Result<()> {
        let mut pending = vec![(self.clone(), true)];
        let mut seen = HashSet::new();
        while let Some((next, top)) = pending.pop() {
            let Some(cell) = next.value() else {
                continue;
            };
            if !seen.insert(next.hash()) {
                continue;
            }
            if top || !next.is_embedded() {
                if let Some(bytes) = next.encoding() {
                    store.put(next.hash(), bytes)?;
                }
            }
            pending.extend(cell.child_refs().into_iter().map(|c| (c.clone(), false)));
        }
        Ok(())
    }

    pub fn flags(&self) -> u8 {
        self.0.flags.load(Ordering::Acquire)
    }

    fn set_flag(&self, flag: u8) {
        self.0.flags.fetch_or(flag, Ordering::AcqRel);
    }

    pub fn is_verified(&self) -> bool {
        self.flags() & VERIFIED != 0
    }

    pub fn mark_bad(&self) {
        self.set_flag(BAD);
    }

    pub fn is_bad(&self) -> bool {
        self.flags() & BAD != 0
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Bytes stored under `hash`, checked against it and decoded.
fn fetch(hash: Hash, store: &dyn Store) -> Result<(Cell, Vec<u8>)> {
    let Some(bytes) = store.get(&hash)? else {
        debug!(%hash, "cell not in store");
        return Err(CellError::missing(hash, "not in store"));
    };
    let actual = cell_hash::blake3(&bytes);
    if actual != hash {
        warn!(%hash, %actual, "store returned bytes for a different hash");
        return Err(CellError::format(format!(
            "bytes for {hash} hash to {actual}"
        )));
    }
    let cell = crate::encoding::decode(&bytes)?;
    Ok((cell, bytes))
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.hash() == other.hash()
    }
}

impl Eq for Ref {}

impl std::hash::Hash for Ref {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(Ref::hash(self).as_bytes());
    }
}

impl From<Cell> for Ref {
    fn from(cell: Cell) -> Self {
        Ref::new(cell)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(cell) => write!(f, "Ref({cell:?})"),
            None => write!(f, "Ref({})", self.hash()),
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(cell) => write!(f, "{cell}"),
            None => write!(f, "#ref {}", self.hash()),
        }
    }
}

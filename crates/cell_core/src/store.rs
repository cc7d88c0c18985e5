//! Storage collaborator interface plus the in-memory backend.
//!
//! Stores are keyed by the hash of the bytes they hold, so concurrent writers
//! of one hash always write identical bytes and `put` is insert-if-absent.

use crate::cell::Cell;
use crate::config::CoreConfig;
use crate::error::{CellError, Result};
use crate::reference::Ref;
use cell_hash::Hash;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type DynStore = Arc<dyn Store>;

pub trait Store: Send + Sync {
    fn put(&self, hash: Hash, bytes: &[u8]) -> StoreResult<()>;
    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>>;

    fn contains(&self, hash: &Hash) -> StoreResult<bool> {
        Ok(self.get(hash)?.is_some())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error for {hash} at {path:?}: {source}")]
    Io {
        hash: Hash,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backend error for {hash}: {message}")]
    Backend { hash: Hash, message: String },
}

impl StoreError {
    pub fn hash(&self) -> Hash {
        match self {
            StoreError::Io { hash, .. } | StoreError::Backend { hash, .. } => *hash,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemStore {
    cells: Arc<RwLock<HashMap<Hash, Vec<u8>>>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore").field("cells", &self.len()).finish()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemStore {
    fn put(&self, hash: Hash, bytes: &[u8]) -> StoreResult<()> {
        let mut guard = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        guard.entry(hash).or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        let guard = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(hash).cloned())
    }

    fn contains(&self, hash: &Hash) -> StoreResult<bool> {
        let guard = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.contains_key(hash))
    }
}

/// Bounds on a subtree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    pub max_depth: usize,
    pub max_cells: usize,
}

impl WalkLimits {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_cells: config.preload_cell_limit,
        }
    }
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

struct Walk<'a> {
    store: &'a dyn Store,
    limits: WalkLimits,
    cells: usize,
    done: HashMap<Hash, Ref>,
}

impl Walk<'_> {
    fn resolve(&mut self, node: &Ref, depth: usize) -> Result<Ref> {
        if depth > self.limits.max_depth {
            return Err(CellError::format(format!(
                "tree deeper than {} levels at {}",
                self.limits.max_depth,
                node.hash()
            )));
        }
        self.cells += 1;
        if self.cells > self.limits.max_cells {
            return Err(CellError::format(format!(
                "tree holds more than {} cells",
                self.limits.max_cells
            )));
        }
        let cell = node.resolve(self.store)?;
        if cell.ref_count() == 0 {
            return Ok(node.clone());
        }
        // shared stored subtrees are walked once
        let stored = !node.is_embedded();
        if stored {
            if let Some(hit) = self.done.get(&node.hash()) {
                return Ok(hit.clone());
            }
        }
        let rebuilt = cell.update_refs(&mut |child| self.resolve(child, depth + 1))?;
        let out = Ref::from_resolved(rebuilt, node);
        if stored {
            self.done.insert(node.hash(), out.clone());
        }
        Ok(out)
    }
}

/// Materialize `root` and every ref below it, rebuilding each resolved node
/// through `update_refs`. The returned ref is semantically equal to `root`.
/// Trees past the default [`WalkLimits`] are a format error.
pub fn resolve_all(root: &Ref, store: &dyn Store) -> Result<Ref> {
    resolve_all_within(root, store, WalkLimits::default())
}

pub fn resolve_all_within(root: &Ref, store: &dyn Store, limits: WalkLimits) -> Result<Ref> {
    Walk {
        store,
        limits,
        cells: 0,
        done: HashMap::new(),
    }
    .resolve(root, 0)
}

/// [`Ref::load`] a top-level cell, then [`resolve_all`] below it.
pub fn load_all(hash: Hash, store: &dyn Store) -> Result<Ref> {
    resolve_all(&Ref::load(hash, store)?, store)
}

/// Resolve a single reference on a blocking worker, bounded by `timeout`.
///
/// The lookup thread cannot be interrupted; on timeout its result is dropped
/// and the caller sees a missing-data error.
pub async fn resolve_with_timeout(
    reference: Ref,
    store: DynStore,
    timeout: Duration,
) -> Result<Arc<Cell>> {
    if let Some(cell) = reference.value() {
        return Ok(cell.clone());
    }
    let hash = reference.hash();
    let job = tokio::task::spawn_blocking(move || reference.resolve(store.as_ref()));
    join_bounded(hash, job, timeout).await
}

/// Like [`resolve_with_timeout`] for a whole subtree (see
/// [`resolve_all_within`]).
pub async fn preload(
    root: Ref,
    store: DynStore,
    timeout: Duration,
    limits: WalkLimits,
) -> Result<Ref> {
    let hash = root.hash();
    let job =
        tokio::task::spawn_blocking(move || resolve_all_within(&root, store.as_ref(), limits));
    join_bounded(hash, job, timeout).await
}

async fn join_bounded<T>(
    hash: Hash,
    job: tokio::task::JoinHandle<Result<T>>,
    timeout: Duration,
) -> Result<T> {
    match tokio::time::timeout(timeout, job).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CellError::missing(
            hash,
            format!("resolver task failed: {join_err}"),
        )),
        Err(_) => {
            warn!(%hash, timeout_ms = timeout.as_millis() as u64, "store resolution timed out");
            Err(CellError::missing(
                hash,
                format!("timed out after {}ms", timeout.as_millis()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_insert_if_absent() {
        let store = MemStore::new();
        let h = cell_hash::blake3(b"a");
        store.put(h, b"a").unwrap();
        store.put(h, b"a").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&h).unwrap(), Some(b"a".to_vec()));
        assert!(store.contains(&h).unwrap());
    }

    #[test]
    fn missing_is_none() {
        let store = MemStore::new();
        assert_eq!(store.get(&Hash::ZERO).unwrap(), None);
        assert!(!store.contains(&Hash::ZERO).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn resolve_all_materializes_nested_refs() {
        let store = MemStore::new();
        let big = |n: i64| Cell::Str(format!("{n:0>200}"));
        let inner = Cell::Vector(vec![Ref::new(big(1)), Ref::new(big(2))]);
        let outer = Ref::new(Cell::Vector(vec![Ref::new(inner), Ref::new(Cell::Long(3))]));
        outer.persist(&store).unwrap();

        let loaded = load_all(outer.hash(), &store).unwrap();
        assert_eq!(loaded, outer);
        let cell = loaded.value().unwrap();
        let first = cell.get_ref(0).unwrap();
        assert!(first.is_resolved());
        let grand = first.value().unwrap().get_ref(1).unwrap().clone();
        assert!(grand.is_resolved());
        assert_eq!(grand.value().unwrap().as_ref(), &big(2));
    }

    fn stored_chain(store: &MemStore, levels: usize) -> Hash {
        let pad = |i: usize| Ref::new(Cell::Blob(vec![i as u8; 150]));
        let mut top = pad(0).hash();
        pad(0).persist(store).unwrap();
        for i in 0..levels {
            let mut slots = vec![Ref::for_hash(top)];
            slots.extend(std::iter::repeat(pad(i + 1)).take(4));
            let link = Cell::Vector(slots);
            let bytes = link.encode();
            top = cell_hash::blake3(&bytes);
            store.put(top, &bytes).unwrap();
            pad(i + 1).persist(store).unwrap();
        }
        top
    }

    #[test]
    fn deep_stored_chain_is_refused_not_overflowed() {
        let store = MemStore::new();
        let top = stored_chain(&store, 200_000);
        let err = load_all(top, &store).unwrap_err();
        assert!(matches!(err, CellError::Format(ref m) if m.contains("deeper than")), "{err}");

        let shallow = stored_chain(&store, 10);
        assert!(load_all(shallow, &store).is_ok());
    }

    #[test]
    fn cell_budget_bounds_shared_fan_out() {
        let store = MemStore::new();
        let leaf = Ref::new(Cell::Blob(vec![1u8; 300]));
        let row = Ref::new(Cell::Vector(vec![leaf; 8]));
        let grid = Ref::new(Cell::Vector(vec![row; 8]));
        grid.persist(&store).unwrap();

        let tight = WalkLimits {
            max_depth: 16,
            max_cells: 10,
        };
        let lazy = Ref::for_hash(grid.hash());
        assert!(matches!(
            resolve_all_within(&lazy, &store, tight),
            Err(CellError::Format(_))
        ));
        let roomy = WalkLimits {
            max_cells: 1_000,
            ..tight
        };
        let loaded = resolve_all_within(&lazy, &store, roomy).unwrap();
        assert_eq!(loaded, grid);
    }
}

//! On-disk cell store.
//!
//! Cells live at `<root>/<h[0..2]>/<h[2..4]>/<hex>.cell`, where `hex` is the
//! hash of the cell bytes. Tenants get their own subtree under `<root>/t/`.
//! Writes go to a temporary file that is renamed into place, so a reader sees
//! either no file or the complete bytes.

use cell_core::store::{Store, StoreError, StoreResult};
use cell_hash::Hash;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const EXT: &str = "cell";
const TENANT_DIR: &str = "t";

static TMP_CTR: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

fn io_error(hash: Hash, path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        hash,
        path: path.to_path_buf(),
        source,
    }
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store scoped to `tenant`, sharing nothing with other tenants.
    pub fn for_tenant(&self, tenant: &str) -> std::io::Result<Self> {
        if tenant.is_empty() || tenant.contains(['/', '\\', '.']) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid tenant name {tenant:?}"),
            ));
        }
        Self::open(self.root.join(TENANT_DIR).join(tenant))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cell_path(&self, hash: &Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.{EXT}"))
    }

    fn write_atomic(hash: Hash, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| io_error(hash, parent, e))?;
        let n = TMP_CTR.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!(".{}.{}.{n}.tmp", hash.to_hex(), std::process::id()));
        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(hash, &tmp, e));
        }
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_error(hash, path, e)
        })
    }
}

impl Store for FsStore {
    fn put(&self, hash: Hash, bytes: &[u8]) -> StoreResult<()> {
        let path = self.cell_path(&hash);
        if path.exists() {
            return Ok(());
        }
        Self::write_atomic(hash, &path, bytes)?;
        debug!(%hash, len = bytes.len(), "cell written");
        Ok(())
    }

    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        let path = self.cell_path(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(*hash, &path, e)),
        }
    }

    fn contains(&self, hash: &Hash) -> StoreResult<bool> {
        Ok(self.cell_path(hash).is_file())
    }
}

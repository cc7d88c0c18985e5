use crate::Hash;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::cell::RefCell;
use tracing::debug;

/// Digest families offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Identity hash for cells.
    Blake3,
    /// Interop only.
    Sha256,
    /// Interop only; the pre-standard Keccak padding used by Ethereum.
    Keccak256,
}

// Known-answer vectors, checked once per process before the first worker
// hands out a digest. A mismatch means identities cannot be trusted.
static SELF_TEST: Lazy<()> = Lazy::new(|| {
    let empty = ::blake3::hash(b"");
    assert_eq!(
        hex::encode(empty.as_bytes()),
        "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262",
        "BLAKE3 digest unavailable or broken"
    );
    let abc: [u8; 32] = Sha256::digest(b"abc").into();
    assert_eq!(
        hex::encode(abc),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        "SHA-256 digest unavailable or broken"
    );
    let keccak: [u8; 32] = Keccak256::digest(b"").into();
    assert_eq!(
        hex::encode(keccak),
        "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        "Keccak-256 digest unavailable or broken"
    );
});

/// Digest state owned by one worker.
///
/// Not shareable: every method takes `&mut self`, so each thread or task that
/// hashes owns its own worker. State is reset after every digest.
pub struct DigestWorker {
    blake3: ::blake3::Hasher,
    sha256: Sha256,
    keccak256: Keccak256,
    digests: u64,
}

impl DigestWorker {
    pub fn new() -> Self {
        Lazy::force(&SELF_TEST);
        debug!(thread = ?std::thread::current().id(), "digest worker initialised");
        Self {
            blake3: ::blake3::Hasher::new(),
            sha256: Sha256::new(),
            keccak256: Keccak256::new(),
            digests: 0,
        }
    }

    pub fn digest(&mut self, algorithm: Algorithm, data: &[u8]) -> Hash {
        self.digests += 1;
        match algorithm {
            Algorithm::Blake3 => {
                self.blake3.update(data);
                let out = self.blake3.finalize();
                self.blake3.reset();
                Hash::from_array(*out.as_bytes())
            }
            Algorithm::Sha256 => {
                self.sha256.update(data);
                Hash::from_array(self.sha256.finalize_reset().into())
            }
            Algorithm::Keccak256 => {
                self.keccak256.update(data);
                Hash::from_array(self.keccak256.finalize_reset().into())
            }
        }
    }

    /// Number of digests computed by this worker.
    pub fn digests(&self) -> u64 {
        self.digests
    }
}

impl Default for DigestWorker {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static WORKER: RefCell<DigestWorker> = RefCell::new(DigestWorker::new());
}

/// Digest `data` with the calling thread's worker.
pub fn digest(algorithm: Algorithm, data: &[u8]) -> Hash {
    WORKER.with(|w| w.borrow_mut().digest(algorithm, data))
}

pub fn blake3(data: &[u8]) -> Hash {
    digest(Algorithm::Blake3, data)
}

pub fn sha256(data: &[u8]) -> Hash {
    digest(Algorithm::Sha256, data)
}

pub fn keccak256(data: &[u8]) -> Hash {
    digest(Algorithm::Keccak256, data)
}

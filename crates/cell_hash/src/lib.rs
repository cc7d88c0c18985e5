//! Digests for content addressing.
//!
//! BLAKE3 is the identity hash of every cell. SHA-256 and Keccak-256 are only
//! offered for interop with outside systems and never used as a cell identity.
//!
//! Digest state is owned by a [`DigestWorker`]. The free functions
//! ([`blake3`], [`sha256`], [`keccak256`], [`digest`]) borrow a thread-local worker that is
//! created on first use on each thread.

mod worker;

pub use worker::{blake3, digest, keccak256, sha256, Algorithm, DigestWorker};

use std::fmt;

/// Length in bytes of every digest produced here.
pub const HASH_LEN: usize = 32;

/// Prefix used when a hash is rendered as a content id (`b3:<hex>`).
pub const CID_PREFIX: &str = "b3:";

/// 256-bit digest. Ordered and compared by raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    pub const fn from_array(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Build a hash from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashLengthError> {
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| HashLengthError(bytes.len()))?;
        Ok(Hash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex chars, with or without the `b3:` prefix.
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let rest = s.strip_prefix(CID_PREFIX).unwrap_or(s);
        if rest.len() != HASH_LEN * 2 {
            return Err(HashParseError::InvalidLength(rest.len()));
        }
        let mut buf = [0u8; HASH_LEN];
        hex::decode_to_slice(rest, &mut buf)?;
        Ok(Hash(buf))
    }

    /// `b3:<hex>` rendering used in logs and JSON views.
    pub fn to_cid(&self) -> String {
        format!("{CID_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_cid()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cid())
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(value: [u8; HASH_LEN]) -> Self {
        Hash(value)
    }
}

impl From<Hash> for [u8; HASH_LEN] {
    fn from(value: Hash) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    #[error("hash hex length must be 64, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[derive(Debug, thiserror::Error)]
#[error("hash must be 32 bytes, got {0}")]
pub struct HashLengthError(pub usize);

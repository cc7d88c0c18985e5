//! Ed25519 signing primitive.

use crate::reference::Ref;
use crate::signed::{SignedData, VerificationCache};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// Raw ed25519 public key identifying a signer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey([u8; 32]);

impl AccountKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        AccountKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey(0x{})", self.to_hex())
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

/// An ed25519 signing key.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn account_key(&self) -> AccountKey {
        AccountKey(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(self.signing.sign(bytes).to_bytes())
    }

    /// Sign `value` and record the envelope as valid in the global cache.
    pub fn sign_data(&self, value: Ref) -> SignedData {
        self.sign_data_in(value, &VerificationCache::global())
    }

    pub fn sign_data_in(&self, value: Ref, cache: &VerificationCache) -> SignedData {
        let signature = self.sign(value.hash().as_bytes());
        let data = SignedData::create(self.account_key(), signature, value);
        data.remember(cache, true);
        data
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("account_key", &self.account_key())
            .finish_non_exhaustive()
    }
}

/// False for a wrong signature and for a key that is not a curve point.
pub fn verify(key: &AccountKey, signature: &Signature, bytes: &[u8]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify(bytes, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = KeyPair::from_seed(&[7u8; 32]);
        let sig = kp.sign(b"payload");
        assert!(verify(&kp.account_key(), &sig, b"payload"));
        assert!(!verify(&kp.account_key(), &sig, b"tampered"));
    }

    #[test]
    fn wrong_key_fails() {
        let a = KeyPair::from_seed(&[7u8; 32]);
        let b = KeyPair::generate();
        let sig = a.sign(b"x");
        assert!(!verify(&b.account_key(), &sig, b"x"));
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = KeyPair::from_seed(&[1u8; 32]);
        let b = KeyPair::from_seed(&[1u8; 32]);
        assert_eq!(a.account_key(), b.account_key());
        assert_eq!(a.sign(b"m"), b.sign(b"m"));
    }
}

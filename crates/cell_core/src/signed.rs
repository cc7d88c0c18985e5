//! Signed data envelope with memoized verification.
//!
//! A [`SignedData`] binds a value to an account key. The signature covers the
//! 32 bytes of the value's hash. Verification results live in a
//! [`VerificationCache`] keyed by the envelope hash: once a result is
//! published for a hash it never changes, so every copy of the same envelope
//! (including ones re-read from a store) shares it.

use crate::cell::Cell;
use crate::config::CoreConfig;
use crate::crypto::{self, AccountKey, Signature};
use crate::error::{CellError, Result};
use crate::reference::Ref;
use cell_hash::Hash;
use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

#[derive(Clone)]
pub struct SignedData {
    key: AccountKey,
    signature: Signature,
    value: Ref,
    state: Arc<EnvelopeState>,
}

/// Facts about one envelope that never change once known. Shared by clones;
/// not part of equality or the encoding.
#[derive(Default)]
struct EnvelopeState {
    hash: OnceCell<Hash>,
    valid: OnceCell<bool>,
}

impl SignedData {
    pub fn create(key: AccountKey, signature: Signature, value: Ref) -> Self {
        Self {
            key,
            signature,
            value,
            state: Arc::default(),
        }
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn value_ref(&self) -> &Ref {
        &self.value
    }

    /// Same envelope over a semantically equal value ref.
    pub(crate) fn with_value(&self, value: Ref) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    /// Hash of the envelope cell, computed once.
    pub fn hash(&self) -> Hash {
        *self
            .state
            .hash
            .get_or_init(|| Cell::Signed(self.clone()).hash())
    }

    pub fn is_signature_checked(&self) -> bool {
        self.is_signature_checked_in(&VerificationCache::global())
    }

    /// True once this envelope has been checked, or once any equal envelope
    /// has published a result to `cache`.
    pub fn is_signature_checked_in(&self, cache: &VerificationCache) -> bool {
        self.state.valid.get().is_some() || cache.get(&self.hash()).is_some()
    }

    /// Verify once and publish the result. Later calls (on this or any equal
    /// envelope) read the remembered result.
    pub fn check_signature(&self) -> bool {
        self.check_signature_in(&VerificationCache::global())
    }

    pub fn check_signature_in(&self, cache: &VerificationCache) -> bool {
        let hash = self.hash();
        let valid = match self.state.valid.get().copied().or_else(|| cache.get(&hash)) {
            Some(valid) => valid,
            None => crypto::verify(&self.key, &self.signature, self.value.hash().as_bytes()),
        };
        let valid = self.remember(cache, valid);
        if !valid {
            if !self.value.is_bad() {
                warn!(envelope = %hash, key = %self.key, "signature verification failed");
            }
            self.value.mark_bad();
        }
        valid
    }

    /// Record `valid` on this envelope and in `cache`. The first result
    /// recorded anywhere wins and is returned.
    pub(crate) fn remember(&self, cache: &VerificationCache, valid: bool) -> bool {
        let hash = self.hash();
        cache.publish(hash, valid);
        // a concurrent checker may have won; its answer is the same
        let settled = cache.get(&hash).unwrap_or(valid);
        *self.state.valid.get_or_init(|| settled)
    }

    pub fn validate_signature(&self) -> Result<()> {
        self.validate_signature_in(&VerificationCache::global())
    }

    pub fn validate_signature_in(&self, cache: &VerificationCache) -> Result<()> {
        if self.check_signature_in(cache) {
            Ok(())
        } else {
            Err(CellError::BadSignature(self.hash()))
        }
    }
}

impl PartialEq for SignedData {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.signature == other.signature && self.value == other.value
    }
}

impl Eq for SignedData {}

impl std::fmt::Debug for SignedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedData")
            .field("key", &self.key)
            .field("signature", &self.signature)
            .field("value", &self.value)
            .field("valid", &self.state.valid.get())
            .finish()
    }
}

struct Entry {
    valid: bool,
    seq: u64,
}

struct Inner {
    entries: HashMap<Hash, Entry>,
    cap: usize,
    seq_ctr: u64,
}

impl Inner {
    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.cap {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| *k)
            else {
                return;
            };
            self.entries.remove(&victim);
        }
    }
}

/// Bounded map from envelope hash to verification result.
///
/// The first published result for a hash wins. The oldest entry is evicted
/// at capacity; an evicted envelope is simply verified again.
pub struct VerificationCache {
    inner: Mutex<Inner>,
}

static GLOBAL: Lazy<Arc<VerificationCache>> = Lazy::new(|| {
    let cfg = CoreConfig::from_env();
    Arc::new(VerificationCache::new(cfg.signature_cache_entries))
});

impl VerificationCache {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(cap.min(4096)),
                cap: cap.max(1),
                seq_ctr: 0,
            }),
        }
    }

    /// Process-wide cache used by the non-`_in` methods.
    pub fn global() -> Arc<VerificationCache> {
        GLOBAL.clone()
    }

    pub fn get(&self, hash: &Hash) -> Option<bool> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(hash).map(|e| e.valid)
    }

    /// Record a result. Returns false when a result was already present, in
    /// which case the existing one is kept.
    pub fn publish(&self, hash: Hash, valid: bool) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.contains_key(&hash) {
            return false;
        }
        let seq = inner.seq_ctr;
        inner.seq_ctr += 1;
        inner.entries.insert(hash, Entry { valid, seq });
        inner.evict_if_needed();
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for VerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::store::MemStore;

    fn key() -> KeyPair {
        KeyPair::from_seed(&[7u8; 32])
    }

    #[test]
    fn bad_signature_is_checked_once_and_taints_value() {
        let cache = VerificationCache::new(16);
        let kp = key();
        let value = Ref::new(Cell::Long(42));
        let forged = SignedData::create(kp.account_key(), kp.sign(b"other bytes"), value.clone());

        assert!(!forged.is_signature_checked_in(&cache));
        assert!(!forged.check_signature_in(&cache));
        assert!(forged.is_signature_checked_in(&cache));
        assert!(value.is_bad());
        assert!(matches!(
            forged.validate_signature_in(&cache),
            Err(CellError::BadSignature(h)) if h == forged.hash()
        ));
        // idempotent
        assert!(!forged.check_signature_in(&cache));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn persisted_copy_shares_cached_result() {
        let cache = VerificationCache::new(16);
        let store = MemStore::new();
        let kp = key();
        let forged = SignedData::create(
            kp.account_key(),
            kp.sign(b"nope"),
            Ref::new(Cell::string("payload")),
        );
        assert!(!forged.check_signature_in(&cache));

        let r = Ref::new(Cell::Signed(forged.clone()));
        r.persist(&store).unwrap();
        let reloaded = Ref::load(r.hash(), &store).unwrap();
        let Cell::Signed(copy) = reloaded.value().unwrap().as_ref() else {
            panic!("expected signed cell");
        };
        assert!(copy.is_signature_checked_in(&cache));
        assert!(copy.validate_signature_in(&cache).is_err());
    }

    #[test]
    fn sign_data_is_already_checked() {
        let cache = VerificationCache::new(16);
        let sd = key().sign_data_in(Ref::new(Cell::Long(1)), &cache);
        assert!(sd.is_signature_checked_in(&cache));
        assert!(sd.validate_signature_in(&cache).is_ok());
    }

    #[test]
    fn nil_value_can_be_signed() {
        let cache = VerificationCache::new(16);
        let kp = key();
        let sd = SignedData::create(
            kp.account_key(),
            kp.sign(Cell::Nil.hash().as_bytes()),
            Ref::nil(),
        );
        assert!(sd.check_signature_in(&cache));
        assert!(!sd.value_ref().is_bad());
    }

    #[test]
    fn signs_stored_value_by_hash() {
        let cache = VerificationCache::new(16);
        let big = Ref::new(Cell::Blob(vec![1u8; 400]));
        let sd = key().sign_data_in(big.clone(), &cache);
        let fresh = SignedData::create(*sd.key(), *sd.signature(), Ref::for_hash(big.hash()));
        let other_cache = VerificationCache::new(16);
        assert!(fresh.check_signature_in(&other_cache));
        assert!(!fresh.value_ref().is_resolved());
    }

    #[test]
    fn cache_evicts_oldest_and_keeps_first_writer() {
        let cache = VerificationCache::new(2);
        let h = |b: &[u8]| cell_hash::blake3(b);
        assert!(cache.publish(h(b"a"), true));
        assert!(!cache.publish(h(b"a"), false));
        assert_eq!(cache.get(&h(b"a")), Some(true));
        cache.publish(h(b"b"), false);
        cache.publish(h(b"c"), true);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&h(b"a")), None);
        assert_eq!(cache.get(&h(b"b")), Some(false));
    }

    #[test]
    fn concurrent_first_checks_agree() {
        let cache = Arc::new(VerificationCache::new(64));
        let kp = key();
        let sd = kp.sign_data_in(Ref::new(Cell::Long(9)), &VerificationCache::new(1));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let cache = cache.clone();
                let sd = sd.clone();
                s.spawn(move || assert!(sd.check_signature_in(&cache)));
            }
        });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn checked_envelope_survives_cache_eviction() {
        let cache = VerificationCache::new(1);
        let kp = key();
        let first = SignedData::create(
            kp.account_key(),
            kp.sign(Cell::Long(1).hash().as_bytes()),
            Ref::new(Cell::Long(1)),
        );
        let second = SignedData::create(
            kp.account_key(),
            kp.sign(b"forged"),
            Ref::new(Cell::Long(2)),
        );
        assert!(first.check_signature_in(&cache));
        assert!(!second.check_signature_in(&cache));
        assert_eq!(cache.get(&first.hash()), None);
        assert!(first.is_signature_checked_in(&cache));
        assert!(first.clone().is_signature_checked_in(&cache));
        assert!(first.validate_signature_in(&cache).is_ok());
    }

    #[test]
    fn envelope_identity_is_stable_across_resolution() {
        let cache = VerificationCache::new(16);
        let store = MemStore::new();
        let kp = key();

        let big = Ref::new(Cell::Blob(vec![4u8; 300]));
        big.persist(&store).unwrap();
        let signed = kp.sign_data_in(big.clone(), &cache);
        let lazy = SignedData::create(*signed.key(), *signed.signature(), Ref::for_hash(big.hash()));
        let before = Cell::Signed(lazy.clone()).hash();
        assert!(lazy.is_signature_checked_in(&cache));
        lazy.value_ref().resolve(&store).unwrap();
        assert_eq!(Cell::Signed(lazy.clone()).hash(), before);
        assert_eq!(lazy.hash(), signed.hash());
        assert!(lazy.is_signature_checked_in(&cache));

        let small = Ref::new(Cell::Long(1));
        small.persist(&store).unwrap();
        let sd = kp.sign_data_in(Ref::for_hash(small.hash()), &cache);
        assert!(sd.value_ref().resolve(&store).is_err());
        assert!(sd.is_signature_checked_in(&cache));
        assert_ne!(sd.hash(), kp.sign_data_in(small, &cache).hash());
    }
}

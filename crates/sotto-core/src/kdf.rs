//! Purpose-bound key derivation with per-secret memoization
//!
//! Derives fixed-length subkeys from one shared secret via HKDF-SHA256,
//! domain-separated by a purpose label and an optional salt. Derivations
//! are memoized for the lifetime of the owning secret; dropping the
//! keyring wipes the secret and every cached derivation together.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::types::SecretBytes;

/// Fixed-length all-zero salt used when the caller supplies none. Callers
/// wanting stronger domain separation pass a per-use salt.
const DEFAULT_SALT: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    purpose: String,
    length: usize,
    salt: Vec<u8>,
}

/// Keyring bound to a single shared secret instance.
///
/// Deterministic: the same `(purpose, length, salt)` always yields the same
/// output for this secret. Concurrent derivations of an uncached key may
/// recompute; the last write wins with an identical value.
pub struct SecretKeyring {
    secret: SecretBytes,
    cache: Mutex<HashMap<CacheKey, Zeroizing<Vec<u8>>>>,
}

impl SecretKeyring {
    /// Bind a keyring to a shared secret. Zero-length secrets are rejected.
    pub fn new(secret: SecretBytes) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::KeyDerivation("empty source secret".to_string()));
        }
        Ok(Self {
            secret,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Derive `length` bytes bound to `purpose` and `salt`.
    ///
    /// Never returns partial or zero-filled material: any expansion problem
    /// surfaces as a `KeyDerivation` error.
    pub fn derive(&self, purpose: &str, length: usize, salt: Option<&[u8]>) -> Result<SecretBytes> {
        if purpose.is_empty() {
            return Err(Error::KeyDerivation("empty purpose label".to_string()));
        }
        if length == 0 {
            return Err(Error::KeyDerivation("zero output length".to_string()));
        }

        let salt_bytes = salt.unwrap_or(&DEFAULT_SALT);
        let key = CacheKey {
            purpose: purpose.to_string(),
            length,
            salt: salt_bytes.to_vec(),
        };

        if let Some(hit) = self.lock_cache().get(&key) {
            return Ok(SecretBytes::from_slice(hit));
        }

        // Computed outside the lock; a concurrent recompute produces the
        // identical value
        let hk = Hkdf::<Sha256>::new(Some(salt_bytes), self.secret.as_bytes());
        let mut output = Zeroizing::new(vec![0u8; length]);
        hk.expand(purpose.as_bytes(), &mut output).map_err(|_| {
            Error::KeyDerivation(format!("cannot expand {} bytes", length))
        })?;

        let derived = SecretBytes::from_slice(&output);
        self.lock_cache().insert(key, output);
        Ok(derived)
    }

    /// Derive with the engine's standard key length
    pub fn derive_default(&self, purpose: &str, salt: Option<&[u8]>) -> Result<SecretBytes> {
        self.derive(purpose, crate::DERIVED_KEY_LEN, salt)
    }

    /// Wipe and discard every cached derivation. The keyring remains usable;
    /// later derivations recompute.
    pub fn clear(&self) {
        self.lock_cache().clear();
    }

    /// Clear the cache and hand the secret back to the caller
    pub fn into_secret(self) -> SecretBytes {
        self.clear();
        self.secret
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Zeroizing<Vec<u8>>>> {
        // Cache entries are only ever inserted fully written, so a poisoned
        // lock still guards a consistent map
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

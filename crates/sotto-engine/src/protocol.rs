//! External zero-knowledge authentication capability
//!
//! The engine treats the authentication protocol as a black box: one
//! exchange proves knowledge of a phrase against one tag's record and
//! exports a shared secret on success. Envelope construction and the
//! underlying algebra live behind this trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use zeroize::Zeroize;

use sotto_core::{CandidateTag, Error, ErrorKind, Result, SecretBytes, TagId};

use crate::clock::Clock;

/// Zero-knowledge authentication capability consumed by the orchestrator
#[async_trait]
pub trait AuthProtocol: Send + Sync {
    /// Run one authentication exchange for `tag_id` with the given phrase.
    ///
    /// Returns the exported shared secret on success. Must be safe to call
    /// repeatedly with different tag identifiers without cross-contamination
    /// of state.
    async fn authenticate(&self, tag_id: &TagId, phrase: &str) -> Result<SecretBytes>;

    /// Best-effort wipe of internal protocol state. Invoked during panic
    /// mode; must not fail.
    async fn clear_memory(&self);
}

#[derive(Clone)]
struct MockRecord {
    phrase: String,
    secret: Vec<u8>,
    fail_with: Option<ErrorKind>,
}

/// Scripted in-memory protocol used by tests.
///
/// Tags are registered with their unlock phrase and the secret the exchange
/// would export; transport and protocol failures can be injected per tag.
/// An optional clock latency models slow exchanges against a virtual
/// timeline.
#[derive(Default)]
pub struct MockProtocol {
    records: Mutex<HashMap<TagId, MockRecord>>,
    latency: Option<(Arc<dyn Clock>, u64)>,
    calls: AtomicUsize,
    cleared: AtomicBool,
}

impl MockProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every exchange consume `latency_ms` on the given clock
    pub fn with_latency(clock: Arc<dyn Clock>, latency_ms: u64) -> Self {
        Self {
            latency: Some((clock, latency_ms)),
            ..Self::default()
        }
    }

    /// Register a tag's authentication record
    pub fn register(&self, tag: &CandidateTag, phrase: &str, secret: &[u8]) {
        self.lock_records().insert(
            tag.id.clone(),
            MockRecord {
                phrase: phrase.to_string(),
                secret: secret.to_vec(),
                fail_with: None,
            },
        );
    }

    /// Make every exchange against `tag_id` fail with the given kind
    pub fn inject_failure(&self, tag_id: &TagId, kind: ErrorKind) {
        if let Some(record) = self.lock_records().get_mut(tag_id) {
            record.fail_with = Some(kind);
        }
    }

    /// Total exchanges attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether `clear_memory` has been invoked
    pub fn cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<TagId, MockRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error_for(kind: ErrorKind, tag_id: &TagId) -> Error {
        match kind {
            ErrorKind::Network => Error::Network("injected transport failure".to_string()),
            ErrorKind::Protocol => Error::Protocol("injected malformed response".to_string()),
            ErrorKind::Timeout => Error::Timeout,
            _ => Error::AuthenticationMismatch(tag_id.to_string()),
        }
    }
}

#[async_trait]
impl AuthProtocol for MockProtocol {
    async fn authenticate(&self, tag_id: &TagId, phrase: &str) -> Result<SecretBytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, ms)) = &self.latency {
            clock.sleep_ms(*ms).await;
        }

        let record = self.lock_records().get(tag_id).cloned();
        match record {
            Some(record) => {
                if let Some(kind) = record.fail_with {
                    return Err(Self::error_for(kind, tag_id));
                }
                if record.phrase == phrase {
                    Ok(SecretBytes::from_slice(&record.secret))
                } else {
                    Err(Error::AuthenticationMismatch(tag_id.to_string()))
                }
            }
            None => Err(Error::AuthenticationMismatch(tag_id.to_string())),
        }
    }

    async fn clear_memory(&self) {
        self.cleared.store(true, Ordering::SeqCst);
        let mut records = self.lock_records();
        for record in records.values_mut() {
            record.secret.zeroize();
        }
        records.clear();
    }
}

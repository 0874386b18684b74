//! Sotto Core - Shared types, phrase matching, and key derivation
//!
//! This crate provides the foundational types and utilities for the sotto
//! spoken-phrase unlock engine.

pub mod error;
pub mod kdf;
pub mod phrase;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use kdf::SecretKeyring;
pub use phrase::{is_panic_phrase, normalize, PANIC_PHRASES};
pub use types::{AuthMatch, AuthOutcome, CandidateTag, PhraseOutcome, SecretBytes, TagId};

/// Default session lifetime (15 minutes)
pub const DEFAULT_SESSION_TTL_MS: u64 = 15 * 60 * 1000;

/// Default time budget for one candidate search
pub const DEFAULT_SEARCH_BUDGET_MS: u64 = 2_000;

/// Maximum recovery operations tracked at once
pub const MAX_CONCURRENT_RECOVERIES: usize = 10;

/// Timeout applied to a single recovery strategy attempt
pub const RECOVERY_ATTEMPT_TIMEOUT_MS: u64 = 30_000;

/// Default retry budget for a recovery operation
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between recovery attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Upper bound on an exponential backoff delay
pub const MAX_BACKOFF_DELAY_MS: u64 = 30_000;

/// Pause used by the generic retry rule when no strategy is registered
pub const GENERIC_RETRY_PAUSE_MS: u64 = 1_000;

/// Output length of derived session and vault keys
pub const DERIVED_KEY_LEN: usize = 32;

/// Purpose label for content decryption keys
pub const PURPOSE_VAULT_KEY: &str = "VaultKey";

/// Purpose label for session keys
pub const PURPOSE_SESSION_KEY: &str = "SessionKey";

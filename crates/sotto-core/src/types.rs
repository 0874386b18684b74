//! Shared types for the sotto unlock engine

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ErrorKind;

/// Opaque identifier for a secret tag
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(String);

impl TagId {
    /// Create a new TagId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log output (first 8 characters)
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A possible match target during phrase search. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTag {
    /// Tag identifier
    pub id: TagId,

    /// Display name
    pub name: String,
}

impl CandidateTag {
    /// Create a new candidate
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TagId::new(id),
            name: name.into(),
        }
    }
}

/// Owned secret byte buffer, overwritten with zeros on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Take ownership of an existing buffer
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy a slice into a new secret buffer
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True once the buffer has been wiped (or was empty to begin with)
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}

/// A successful authentication exchange against one candidate
#[derive(Debug)]
pub struct AuthMatch {
    /// Matched tag identifier
    pub tag_id: TagId,

    /// Matched tag name
    pub tag_name: String,

    /// Shared secret exported by the exchange
    pub shared_secret: SecretBytes,

    /// Content decryption key derived from the shared secret
    pub vault_key: SecretBytes,
}

/// Result of a candidate search
#[derive(Debug)]
pub enum AuthOutcome {
    /// One candidate authenticated; no further candidates were attempted
    Match(AuthMatch),

    /// Every candidate was attempted without success
    NoMatch {
        /// Classification of the last recorded per-candidate failure
        last_error: Option<ErrorKind>,
    },

    /// The time budget ran out before a match
    TimedOut {
        /// Candidates attempted before the budget was exhausted
        attempted: usize,
    },

    /// The phrase normalized to nothing; no exchange was attempted
    EmptyPhrase,
}

impl AuthOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, AuthOutcome::Match(_))
    }
}

/// Outcome of a phrase check, as reported to the voice pipeline.
///
/// Every failure shape collapses to `NotFound` so a failed check is
/// indistinguishable from silence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhraseOutcome {
    /// No recognized phrase
    NotFound,

    /// A tag was unlocked and a session activated
    Activated { tag_id: TagId, tag_name: String },

    /// The matched tag already had a session; it was deactivated
    Deactivated { tag_id: TagId, tag_name: String },

    /// A panic phrase was recognized and all sessions were wiped
    Panic { wiped: usize },
}

impl PhraseOutcome {
    /// Whether the phrase was recognized at all
    pub fn found(&self) -> bool {
        !matches!(self, PhraseOutcome::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_id_short() {
        let id = TagId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");

        let tiny = TagId::new("ab");
        assert_eq!(tiny.short(), "ab");
    }

    #[test]
    fn test_secret_bytes_debug_redacted() {
        let secret = SecretBytes::from_slice(&[0xAA; 16]);
        let rendered = format!("{:?}", secret);
        assert_eq!(rendered, "SecretBytes(16 bytes)");
        assert!(!rendered.contains("AA"));
    }

    #[test]
    fn test_secret_bytes_zeroize() {
        let mut secret = SecretBytes::from_slice(&[0xAA; 16]);
        assert!(!secret.is_zeroed());
        secret.zeroize();
        assert!(secret.is_zeroed());
    }

    #[test]
    fn test_phrase_outcome_found() {
        assert!(!PhraseOutcome::NotFound.found());
        assert!(PhraseOutcome::Panic { wiped: 0 }.found());
        assert!(PhraseOutcome::Activated {
            tag_id: TagId::new("t"),
            tag_name: "t".to_string(),
        }
        .found());
    }
}

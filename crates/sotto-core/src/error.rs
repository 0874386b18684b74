//! Error types for the sotto core library

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Authentication mismatch for tag {0}")]
    AuthenticationMismatch(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Unexpected state: {0}")]
    UnexpectedState(String),
}

/// Error classification used for recovery strategy dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Candidate did not match; expected during a search, never fatal
    AuthenticationMismatch,
    /// Transport unavailable; retryable
    Network,
    /// Malformed or unexpected protocol response; retryable with caution
    Protocol,
    /// Deadline or budget exceeded; terminal for the current search
    Timeout,
    /// Concurrency cap hit; caller should back off before resubmitting
    ResourceExhausted,
    /// Corrupted derivation input; terminal, not retryable
    KeyDerivation,
    /// Engine-internal invariant violation; always logged
    UnexpectedState,
}

impl Error {
    /// Classification of this error for strategy dispatch
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthenticationMismatch(_) => ErrorKind::AuthenticationMismatch,
            Error::Network(_) => ErrorKind::Network,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Timeout => ErrorKind::Timeout,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::KeyDerivation(_) => ErrorKind::KeyDerivation,
            Error::UnexpectedState(_) => ErrorKind::UnexpectedState,
        }
    }

    /// Whether resubmitting the failed operation can succeed
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Protocol | ErrorKind::Timeout | ErrorKind::ResourceExhausted
        )
    }
}

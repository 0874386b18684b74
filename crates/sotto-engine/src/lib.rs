//! Sotto Engine - authentication matching, session lifecycle, and recovery
//!
//! The engine takes a normalized spoken phrase and a time budget, attempts
//! a zero-knowledge authentication exchange against every known tag until
//! one succeeds or the budget is exhausted, derives purpose-specific keys
//! from the resulting shared secret, and manages the session's expiry,
//! concurrent access, and secure teardown. A strategy-driven recovery
//! layer wraps transient failures in bounded retry.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod recovery;
pub mod session;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::EngineConfig;
pub use engine::UnlockEngine;
pub use error::{EngineError, Result};
pub use orchestrator::AuthOrchestrator;
pub use protocol::{AuthProtocol, MockProtocol};
pub use recovery::{
    RecoveryContext, RecoveryEngine, RecoveryOptions, RecoveryResult, RecoveryStrategy,
};
pub use session::{Session, SessionInfo, SessionStore};

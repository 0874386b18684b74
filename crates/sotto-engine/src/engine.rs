//! Engine assembly and the phrase-check surface
//!
//! One `UnlockEngine` is constructed per process by the application
//! assembly root and shared from there. All collaborators are injected;
//! nothing here is an ambient static.

use std::sync::Arc;

use tracing::{debug, info, warn};

use sotto_core::{
    is_panic_phrase, normalize, AuthMatch, AuthOutcome, CandidateTag, Error, PhraseOutcome,
    SecretKeyring, DERIVED_KEY_LEN, PURPOSE_SESSION_KEY,
};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::orchestrator::AuthOrchestrator;
use crate::protocol::AuthProtocol;
use crate::recovery::{RecoveryContext, RecoveryEngine, RecoveryOptions, RecoveryResult};
use crate::session::SessionStore;

/// The spoken-phrase unlock engine
pub struct UnlockEngine {
    config: EngineConfig,
    protocol: Arc<dyn AuthProtocol>,
    store: Arc<SessionStore>,
    orchestrator: AuthOrchestrator,
    recovery: RecoveryEngine,
}

impl UnlockEngine {
    pub fn new(config: EngineConfig, protocol: Arc<dyn AuthProtocol>) -> Self {
        Self::with_clock(config, protocol, Arc::new(SystemClock::new()))
    }

    /// Construct against an explicit clock (virtual in tests)
    pub fn with_clock(
        config: EngineConfig,
        protocol: Arc<dyn AuthProtocol>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(clock.clone()));
        let orchestrator = AuthOrchestrator::new(protocol.clone(), clock.clone());
        let recovery = RecoveryEngine::with_limits(
            clock,
            config.max_concurrent_recoveries,
            config.recovery_timeout_ms,
        );
        Self {
            config,
            protocol,
            store,
            orchestrator,
            recovery,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The session store, for status surfaces and content decryption
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The recovery engine, for strategy registration
    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// Spawn the background session-expiry loop
    pub fn start_expiry_task(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.store.clone().run_expiry())
    }

    /// Check a transcribed phrase against the candidate tags.
    ///
    /// Panic phrases take absolute priority: every session is wiped and the
    /// protocol's memory cleared before any authentication would run. A
    /// successful match toggles the tag: an active session is deactivated
    /// (the phrase acts as a logout), otherwise a new session is activated.
    /// Every failure shape collapses to `NotFound`, indistinguishable from
    /// silence.
    pub async fn check_phrase(
        &self,
        transcribed: &str,
        candidates: &[CandidateTag],
    ) -> PhraseOutcome {
        let normalized = normalize(transcribed);
        if normalized.is_empty() {
            return PhraseOutcome::NotFound;
        }

        if is_panic_phrase(&normalized, &self.config.extra_panic_phrases) {
            let wiped = self.store.wipe_all().await;
            self.protocol.clear_memory().await;
            info!(wiped, "panic phrase recognized");
            return PhraseOutcome::Panic { wiped };
        }

        let outcome = self
            .orchestrator
            .attempt(&normalized, candidates, self.config.search_budget_ms)
            .await;

        match outcome {
            AuthOutcome::Match(matched) => {
                // The toggle is decided only after authentication completed;
                // the deactivate below is the atomic check-and-act, so an
                // expiry firing mid-search yields a fresh activation rather
                // than a phantom logout
                if self.store.deactivate(&matched.tag_id).await {
                    info!(tag = %matched.tag_id.short(), "active tag matched, deactivated");
                    return PhraseOutcome::Deactivated {
                        tag_id: matched.tag_id,
                        tag_name: matched.tag_name,
                    };
                }
                match self.activate_session(matched).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "session activation failed");
                        PhraseOutcome::NotFound
                    }
                }
            }
            AuthOutcome::TimedOut { attempted } => {
                debug!(attempted, "no match within budget");
                PhraseOutcome::NotFound
            }
            AuthOutcome::NoMatch { .. } | AuthOutcome::EmptyPhrase => PhraseOutcome::NotFound,
        }
    }

    /// Submit a failed operation for bounded retry. Falls back to the
    /// configured recovery options when the caller passes none.
    pub async fn recover(
        &self,
        error: &Error,
        ctx: &RecoveryContext,
        options: Option<RecoveryOptions>,
    ) -> RecoveryResult {
        let options = options.unwrap_or_else(|| self.config.recovery_options());
        self.recovery.recover(error, ctx, &options).await
    }

    async fn activate_session(&self, matched: AuthMatch) -> sotto_core::Result<PhraseOutcome> {
        let AuthMatch {
            tag_id,
            tag_name,
            shared_secret,
            vault_key,
        } = matched;

        let keyring = SecretKeyring::new(shared_secret)?;
        let session_key = keyring.derive(
            PURPOSE_SESSION_KEY,
            DERIVED_KEY_LEN,
            Some(tag_id.as_str().as_bytes()),
        )?;
        // Shared secret and derivation cache wiped here
        drop(keyring);

        self.store
            .activate(
                tag_id.clone(),
                tag_name.clone(),
                session_key,
                vault_key,
                self.config.session_ttl_ms,
            )
            .await;
        Ok(PhraseOutcome::Activated { tag_id, tag_name })
    }
}

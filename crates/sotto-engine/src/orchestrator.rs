//! Candidate search under a time budget
//!
//! Attempts a zero-knowledge exchange against each candidate tag, in order,
//! until one succeeds, the budget runs out, or the list is exhausted.
//! Iteration is strictly sequential: first match wins, and no exchange is
//! started after a success or past the deadline.

use std::sync::Arc;

use tracing::{debug, info, warn};

use sotto_core::{
    normalize, AuthMatch, AuthOutcome, CandidateTag, Result, SecretBytes, SecretKeyring,
    DERIVED_KEY_LEN, PURPOSE_VAULT_KEY,
};

use crate::clock::Clock;
use crate::protocol::AuthProtocol;

/// Drives the per-tag authentication search
pub struct AuthOrchestrator {
    protocol: Arc<dyn AuthProtocol>,
    clock: Arc<dyn Clock>,
}

impl AuthOrchestrator {
    pub fn new(protocol: Arc<dyn AuthProtocol>, clock: Arc<dyn Clock>) -> Self {
        Self { protocol, clock }
    }

    /// Try candidates in input order until one authenticates.
    ///
    /// The phrase is normalized first; an empty result short-circuits with
    /// zero protocol calls. A failure against one candidate is recorded and
    /// the search continues. The budget is checked before each exchange;
    /// once exceeded, remaining candidates are not attempted.
    ///
    /// The orchestrator never touches the session store. Whether a match
    /// means login or logout is the caller's decision.
    pub async fn attempt(
        &self,
        phrase: &str,
        candidates: &[CandidateTag],
        budget_ms: u64,
    ) -> AuthOutcome {
        let normalized = normalize(phrase);
        if normalized.is_empty() {
            return AuthOutcome::EmptyPhrase;
        }

        let start = self.clock.now_ms();
        let mut last_error = None;

        for (attempted, candidate) in candidates.iter().enumerate() {
            if self.clock.now_ms().saturating_sub(start) >= budget_ms {
                warn!(attempted, budget_ms, "search budget exhausted");
                return AuthOutcome::TimedOut { attempted };
            }

            match self.protocol.authenticate(&candidate.id, &normalized).await {
                Ok(shared_secret) => {
                    info!(tag = %candidate.id.short(), "authentication succeeded");
                    return match self.finish_match(candidate, shared_secret) {
                        Ok(matched) => AuthOutcome::Match(matched),
                        Err(e) => {
                            warn!(tag = %candidate.id.short(), error = %e, "vault key derivation failed");
                            AuthOutcome::NoMatch {
                                last_error: Some(e.kind()),
                            }
                        }
                    };
                }
                Err(e) => {
                    debug!(tag = %candidate.id.short(), error = %e, "candidate rejected");
                    last_error = Some(e.kind());
                }
            }
        }

        AuthOutcome::NoMatch { last_error }
    }

    /// Derive the vault key for the matched tag and package the outcome.
    /// The keyring is consumed so the secret never lingers here.
    fn finish_match(&self, candidate: &CandidateTag, shared_secret: SecretBytes) -> Result<AuthMatch> {
        let keyring = SecretKeyring::new(shared_secret)?;
        let vault_key = keyring.derive(
            PURPOSE_VAULT_KEY,
            DERIVED_KEY_LEN,
            Some(candidate.id.as_str().as_bytes()),
        )?;
        Ok(AuthMatch {
            tag_id: candidate.id.clone(),
            tag_name: candidate.name.clone(),
            shared_secret: keyring.into_secret(),
            vault_key,
        })
    }
}

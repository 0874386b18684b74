//! Concurrent session store with scheduled expiry and secure teardown
//!
//! Holds at most one session per tag. Key buffers are owned exclusively by
//! the store and overwritten with zeros before a session is discarded, on
//! every teardown path: explicit deactivation, timer expiry, panic wipe,
//! and replacement by re-activation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use sotto_core::{SecretBytes, TagId};

use crate::clock::Clock;

/// An authenticated tag session
pub struct Session {
    pub tag_id: TagId,
    pub tag_name: String,
    session_key: SecretBytes,
    vault_key: SecretBytes,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Session {
    fn wipe(&mut self) {
        use zeroize::Zeroize;
        self.session_key.zeroize();
        self.vault_key.zeroize();
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            tag_id: self.tag_id.clone(),
            tag_name: self.tag_name.clone(),
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
        }
    }
}

/// Key-free projection of a session for listing and status surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub tag_id: TagId,
    pub tag_name: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

struct StoreInner {
    sessions: HashMap<TagId, Session>,
    /// (deadline, tag) pairs. Entries are cancelled lazily: on pop, an
    /// entry whose session is gone or carries a newer deadline is skipped.
    expiry: BinaryHeap<Reverse<(u64, TagId)>>,
}

/// Concurrent map of authenticated-tag sessions.
///
/// One lock guards the session table and the expiry heap, so every
/// check-then-act sequence tolerates an interleaved deactivate or
/// re-activate at suspension points.
pub struct SessionStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
    rearm: Notify,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(StoreInner {
                sessions: HashMap::new(),
                expiry: BinaryHeap::new(),
            }),
            rearm: Notify::new(),
        }
    }

    /// Activate a session for `tag_id`, replacing any stale one.
    ///
    /// The previous session, if any, is wiped first. The new session is
    /// scheduled for expiry after `ttl_ms`.
    pub async fn activate(
        &self,
        tag_id: TagId,
        tag_name: String,
        session_key: SecretBytes,
        vault_key: SecretBytes,
        ttl_ms: u64,
    ) -> SessionInfo {
        let now = self.clock.now_ms();
        let expires_at_ms = now.saturating_add(ttl_ms);
        let mut inner = self.inner.lock().await;

        Self::remove_and_wipe(&mut inner, &tag_id);

        let session = Session {
            tag_id: tag_id.clone(),
            tag_name,
            session_key,
            vault_key,
            created_at_ms: now,
            expires_at_ms,
        };
        let session_info = session.info();
        inner.sessions.insert(tag_id.clone(), session);
        inner.expiry.push(Reverse((expires_at_ms, tag_id)));
        drop(inner);
        self.rearm.notify_one();

        info!(
            tag = %session_info.tag_id.short(),
            expires_at_ms = session_info.expires_at_ms,
            "session activated"
        );
        session_info
    }

    /// Wipe and remove the session for `tag_id`.
    ///
    /// Returns true if a session existed. Idempotent: a second concurrent
    /// call for the same tag is a no-op.
    pub async fn deactivate(&self, tag_id: &TagId) -> bool {
        let mut inner = self.inner.lock().await;
        let existed = Self::remove_and_wipe(&mut inner, tag_id);
        drop(inner);
        if existed {
            self.rearm.notify_one();
            debug!(tag = %tag_id.short(), "session deactivated");
        }
        existed
    }

    /// Whether `tag_id` has a live session.
    ///
    /// A session past its deadline is deactivated here (lazy expiry), so a
    /// later `list_active` never reports it.
    pub async fn is_active(&self, tag_id: &TagId) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        match inner.sessions.get(tag_id) {
            Some(session) if now >= session.expires_at_ms => {
                Self::remove_and_wipe(&mut inner, tag_id);
                debug!(tag = %tag_id.short(), "session lazily expired");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Snapshot of live sessions, due sessions purged first
    pub async fn list_active(&self) -> Vec<SessionInfo> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let due: Vec<TagId> = inner
            .sessions
            .values()
            .filter(|s| now >= s.expires_at_ms)
            .map(|s| s.tag_id.clone())
            .collect();
        for tag_id in due {
            Self::remove_and_wipe(&mut inner, &tag_id);
        }
        inner.sessions.values().map(Session::info).collect()
    }

    /// Refresh a session's deadline. The only permitted mutation of a live
    /// session.
    pub async fn extend(&self, tag_id: &TagId, ttl_ms: u64) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let extended = match inner.sessions.get_mut(tag_id) {
            Some(session) if now < session.expires_at_ms => {
                session.expires_at_ms = now.saturating_add(ttl_ms);
                let deadline = session.expires_at_ms;
                inner.expiry.push(Reverse((deadline, tag_id.clone())));
                true
            }
            _ => false,
        };
        drop(inner);
        if extended {
            self.rearm.notify_one();
            debug!(tag = %tag_id.short(), "session extended");
        }
        extended
    }

    /// Caller-owned copy of a session's vault key. The store keeps
    /// exclusive ownership of the live buffer and may zero it at any time
    /// after a deactivate.
    pub async fn vault_key(&self, tag_id: &TagId) -> Option<SecretBytes> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(tag_id)
            .map(|s| SecretBytes::from_slice(s.vault_key.as_bytes()))
    }

    /// Deactivate every tracked session. Used by panic mode; per-session
    /// problems are logged and iteration continues.
    pub async fn wipe_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let tag_ids: Vec<TagId> = inner.sessions.keys().cloned().collect();
        let mut wiped = 0;
        for tag_id in tag_ids {
            if Self::remove_and_wipe(&mut inner, &tag_id) {
                wiped += 1;
            } else {
                warn!(tag = %tag_id.short(), "session vanished during wipe");
            }
        }
        inner.expiry.clear();
        drop(inner);
        self.rearm.notify_one();
        info!(wiped, "all sessions wiped");
        wiped
    }

    /// Wipe and remove the sessions whose deadline has passed. Returns the
    /// affected tag ids.
    pub async fn expire_due(&self) -> Vec<TagId> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let mut expired = Vec::new();
        loop {
            let due = matches!(inner.expiry.peek(), Some(Reverse((deadline, _))) if *deadline <= now);
            if !due {
                break;
            }
            let Some(Reverse((_, tag_id))) = inner.expiry.pop() else {
                break;
            };
            match inner.sessions.get(&tag_id) {
                Some(session) if session.expires_at_ms <= now => {
                    Self::remove_and_wipe(&mut inner, &tag_id);
                    info!(tag = %tag_id.short(), "session expired");
                    expired.push(tag_id);
                }
                // Stale entry: the session was deactivated, replaced, or
                // extended since this deadline was scheduled
                _ => {}
            }
        }
        expired
    }

    /// Earliest scheduled deadline, if any (may be stale)
    pub async fn next_deadline(&self) -> Option<u64> {
        let inner = self.inner.lock().await;
        inner.expiry.peek().map(|entry| (entry.0).0)
    }

    /// Background expiry loop. Sleeps until the earliest deadline, wakes
    /// early when the schedule changes, and deactivates due sessions.
    pub async fn run_expiry(self: Arc<Self>) {
        loop {
            let now = self.clock.now_ms();
            match self.next_deadline().await {
                Some(deadline) if deadline <= now => {
                    self.expire_due().await;
                }
                Some(deadline) => {
                    tokio::select! {
                        _ = self.clock.sleep_ms(deadline - now) => {}
                        _ = self.rearm.notified() => {}
                    }
                    self.expire_due().await;
                }
                None => {
                    self.rearm.notified().await;
                }
            }
        }
    }

    fn remove_and_wipe(inner: &mut StoreInner, tag_id: &TagId) -> bool {
        match inner.sessions.remove(tag_id) {
            Some(mut session) => {
                // Wipe before the buffers are released; the heap entry is
                // cancelled lazily
                session.wipe();
                true
            }
            None => false,
        }
    }
}

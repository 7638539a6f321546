//! In-memory session state, keyed by code.
//!
//! Every mutation of a session runs while holding that code's shard lock,
//! and refreshes its expiry timer under the same lock. A timer that fires
//! claims its generation under the lock too, so a refresh and a fire for one
//! code are always strictly ordered.
//!
//! Lock order: store shard, then expiry timers, then hub membership.
//! Closures passed to this store must not touch another code in it.
//!
//! Once [`SessionStore::close`] has run, no session can be created again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clipshare_core::{ClipboardItem, ItemId, SessionCode, SessionError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::expiry::{ExpiryScheduler, Generation};

/// Shared clipboard state for one code.
#[derive(Clone, Debug)]
pub struct Session {
    pub code: SessionCode,
    /// Arrival order. Only ever appended to or cleared.
    pub items: Vec<ClipboardItem>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(code: SessionCode) -> Self {
        let now = Utc::now();
        Self {
            code,
            items: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn find_item(&self, id: &ItemId) -> Option<&ClipboardItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

/// Owner of every live [`Session`].
pub struct SessionStore {
    sessions: DashMap<SessionCode, Session>,
    expiry: Arc<ExpiryScheduler>,
    closed: AtomicBool,
}

impl SessionStore {
    pub fn new(expiry: Arc<ExpiryScheduler>) -> Self {
        Self {
            sessions: DashMap::new(),
            expiry,
            closed: AtomicBool::new(false),
        }
    }

    /// Get or create the session for `code`, record activity, re-arm its
    /// expiry, then run `f` on it while the code is still locked.
    ///
    /// Fails with [`SessionError::ShuttingDown`] once the store is closed.
    pub fn get_or_create_with<R>(
        &self,
        code: &SessionCode,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let entry = self.sessions.entry(code.clone());
        // Checked under the shard lock so `close` cannot miss a new session.
        if self.is_closed() {
            return Err(SessionError::ShuttingDown);
        }
        let mut session = entry.or_insert_with(|| {
            info!(code = %code, "session created");
            Session::new(code.clone())
        });
        session.touch();
        self.expiry.refresh(code);
        Ok(f(&mut session))
    }

    /// Get or create the session for `code` and return a snapshot of it.
    pub fn get_or_create(&self, code: &SessionCode) -> Result<Session, SessionError> {
        self.get_or_create_with(code, |session| session.clone())
    }

    /// Snapshot lookup. Does not count as activity.
    pub fn get(&self, code: &SessionCode) -> Option<Session> {
        self.sessions.get(code).map(|session| session.clone())
    }

    pub fn contains(&self, code: &SessionCode) -> bool {
        self.sessions.contains_key(code)
    }

    /// Copy of one item. Does not count as activity.
    pub fn find_item(&self, code: &SessionCode, id: &ItemId) -> Result<ClipboardItem, SessionError> {
        let session = self
            .sessions
            .get(code)
            .ok_or_else(|| SessionError::SessionNotFound(code.clone()))?;
        session
            .find_item(id)
            .cloned()
            .ok_or_else(|| SessionError::ItemNotFound(id.clone()))
    }

    /// Mutate an existing session. Records activity and re-arms expiry.
    pub fn mutate<R>(
        &self,
        code: &SessionCode,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut session = self
            .sessions
            .get_mut(code)
            .ok_or_else(|| SessionError::SessionNotFound(code.clone()))?;
        session.touch();
        self.expiry.refresh(code);
        Ok(f(&mut session))
    }

    pub fn append_item(&self, code: &SessionCode, item: ClipboardItem) -> Result<(), SessionError> {
        self.mutate(code, |session| session.items.push(item))
    }

    /// Drop every item. Returns how many were removed.
    pub fn clear(&self, code: &SessionCode) -> Result<usize, SessionError> {
        self.mutate(code, |session| {
            let removed = session.items.len();
            session.items.clear();
            removed
        })
    }

    /// Remove the session and cancel its timer. Idempotent.
    pub fn delete(&self, code: &SessionCode) -> bool {
        match self.sessions.entry(code.clone()) {
            Entry::Occupied(entry) => {
                self.expiry.cancel(code);
                entry.remove();
                info!(code = %code, "session deleted");
                true
            }
            Entry::Vacant(_) => {
                self.expiry.cancel(code);
                false
            }
        }
    }

    /// Delete `code` on behalf of the timer armed as `generation`.
    ///
    /// Runs `on_expired` with the doomed session before removal, under the
    /// code's lock. A superseded generation is a no-op and returns `false`.
    pub fn expire_with(
        &self,
        code: &SessionCode,
        generation: Generation,
        on_expired: impl FnOnce(&Session),
    ) -> bool {
        match self.sessions.entry(code.clone()) {
            Entry::Occupied(entry) => {
                if !self.expiry.claim(code, generation) {
                    debug!(code = %code, generation, "stale expiry ignored");
                    return false;
                }
                on_expired(entry.get());
                entry.remove();
                true
            }
            Entry::Vacant(_) => {
                let _ = self.expiry.claim(code, generation);
                false
            }
        }
    }

    /// Refuse new sessions from now on, then drop every existing one.
    /// Returns how many were dropped.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.clear_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remove every session and cancel every timer. Returns how many
    /// sessions were dropped.
    pub fn clear_all(&self) -> usize {
        let codes: Vec<SessionCode> = self.sessions.iter().map(|e| e.key().clone()).collect();
        codes.iter().filter(|code| self.delete(code)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn codes(&self) -> Vec<SessionCode> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

//! Process-wide session state: store, expiry timers, and hub membership.

use std::sync::{Arc, Weak};
use std::time::Duration;

use clipshare_core::events::{SERVER_SHUTDOWN_MESSAGE, SESSION_EXPIRED_MESSAGE};
use clipshare_core::SessionCode;
use tracing::info;

use crate::expiry::{ExpiryScheduler, Generation};
use crate::hub::BroadcastHub;
use crate::store::SessionStore;

/// Owns every process-wide map. Create with [`SessionRegistry::new`] and tear
/// down with [`SessionRegistry::shutdown`].
pub struct SessionRegistry {
    store: SessionStore,
    hub: BroadcastHub,
    expiry: Arc<ExpiryScheduler>,
}

impl SessionRegistry {
    /// Empty registry whose sessions expire after `idle_timeout` without
    /// activity.
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let expiry = Arc::new(ExpiryScheduler::new(idle_timeout, move |code, generation| {
                if let Some(registry) = weak.upgrade() {
                    registry.expire(&code, generation);
                }
            }));
            Self {
                store: SessionStore::new(Arc::clone(&expiry)),
                hub: BroadcastHub::new(),
                expiry,
            }
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn expiry(&self) -> &ExpiryScheduler {
        &self.expiry
    }

    /// Expiry callback: delete `code` and tell its members, unless
    /// `generation` has been superseded.
    pub fn expire(&self, code: &SessionCode, generation: Generation) -> bool {
        self.store.expire_with(code, generation, |session| {
            self.hub.close_session(code, SESSION_EXPIRED_MESSAGE);
            info!(
                code = %code,
                items = session.items.len(),
                idle_secs = self.expiry.ttl().as_secs(),
                "session expired"
            );
        })
    }

    /// End every session, close every connection, and cancel every timer.
    ///
    /// The store is closed first, so a join racing with shutdown either lands
    /// before it and is swept, or fails with `ShuttingDown`.
    pub fn shutdown(&self) {
        let sessions = self.store.close();
        let connections = self.hub.close_all(SERVER_SHUTDOWN_MESSAGE);
        let timers = self.expiry.cancel_all();
        info!(sessions, connections, timers, "session registry shut down");
    }
}

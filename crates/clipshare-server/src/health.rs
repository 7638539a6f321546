//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::registry::SessionRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open socket connections.
    pub connections: usize,
    /// Live sessions, with or without members.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
    }
}

/// Health snapshot of a registry.
pub fn registry_health(start_time: Instant, registry: &SessionRegistry) -> HealthResponse {
    health_check(
        start_time,
        registry.hub().connection_count(),
        registry.store().len(),
    )
}

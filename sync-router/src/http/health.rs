//! Health check endpoint.

use crate::synchronizer::Synchronizer;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Router version.
    pub version: String,
    /// Number of tracked API sessions.
    pub api_sessions: usize,
    /// Number of network sessions in use.
    pub network_sessions_active: usize,
    /// Number of remembered network-session removals.
    pub tombstones: usize,
    /// Index of the last applied data-state event.
    pub current_index: Option<u64>,
    /// Whether a full data-state sync is in progress.
    pub sync_in_progress: bool,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(sync): Extension<Arc<Synchronizer>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let status = if sync.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_sessions: sync.api_sessions().api_session_count(),
        network_sessions_active: sync.network_sessions().active_count(),
        tombstones: sync.network_sessions().tombstone_count(),
        current_index: sync.current_index(),
        sync_in_progress: sync.is_sync_in_progress(),
        uptime_seconds: uptime,
    })
}

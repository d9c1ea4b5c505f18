//! Prometheus metrics endpoint.

use crate::synchronizer::Synchronizer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(sync): Extension<Arc<Synchronizer>>) -> impl IntoResponse {
    let m = sync.metrics();

    // Gauges
    let api_sessions = sync.api_sessions().api_session_count();
    let network_active = sync.network_sessions().active_count();
    let tombstones = sync.network_sessions().tombstone_count();
    let trusted_keys = sync.trust().snapshot().len();
    let current_index = sync.current_index().unwrap_or(0);
    let sync_in_progress = u8::from(sync.is_sync_in_progress());

    // Counters
    let applied = m.events_applied.load(Ordering::Relaxed);
    let rejected = m.events_rejected.load(Ordering::Relaxed);
    let replacements = m.model_replacements.load(Ordering::Relaxed);
    let chunks = m.validation_chunks_sent.load(Ordering::Relaxed);
    let validation_failures = m.validation_failures.load(Ordering::Relaxed);
    let heartbeats = m.heartbeats_sent.load(Ordering::Relaxed);
    let heartbeat_failures = m.heartbeat_failures.load(Ordering::Relaxed);
    let cert_failures = m.certificate_failures.load(Ordering::Relaxed);
    let token_failures = m.token_failures.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP sync_router_api_sessions Number of tracked API sessions
# TYPE sync_router_api_sessions gauge
sync_router_api_sessions {api_sessions}

# HELP sync_router_network_sessions_active Number of network sessions in use
# TYPE sync_router_network_sessions_active gauge
sync_router_network_sessions_active {network_active}

# HELP sync_router_network_session_tombstones Number of remembered network-session removals
# TYPE sync_router_network_session_tombstones gauge
sync_router_network_session_tombstones {tombstones}

# HELP sync_router_trusted_keys Number of keys in the trust snapshot
# TYPE sync_router_trusted_keys gauge
sync_router_trusted_keys {trusted_keys}

# HELP sync_router_current_index Index of the last applied data-state event
# TYPE sync_router_current_index gauge
sync_router_current_index {current_index}

# HELP sync_router_sync_in_progress Whether a full data-state sync is in progress
# TYPE sync_router_sync_in_progress gauge
sync_router_sync_in_progress {sync_in_progress}

# HELP sync_router_info Router information
# TYPE sync_router_info gauge
sync_router_info{{version="{version}"}} 1

# HELP sync_router_events_applied_total Total data-state events applied
# TYPE sync_router_events_applied_total counter
sync_router_events_applied_total {applied}

# HELP sync_router_events_rejected_total Total data-state events rejected as out of order
# TYPE sync_router_events_rejected_total counter
sync_router_events_rejected_total {rejected}

# HELP sync_router_model_replacements_total Total full data-model replacements
# TYPE sync_router_model_replacements_total counter
sync_router_model_replacements_total {replacements}

# HELP sync_router_validation_chunks_sent_total Total session validation chunks sent
# TYPE sync_router_validation_chunks_sent_total counter
sync_router_validation_chunks_sent_total {chunks}

# HELP sync_router_validation_failures_total Total reconciliation passes aborted
# TYPE sync_router_validation_failures_total counter
sync_router_validation_failures_total {validation_failures}

# HELP sync_router_heartbeats_sent_total Total heartbeats sent
# TYPE sync_router_heartbeats_sent_total counter
sync_router_heartbeats_sent_total {heartbeats}

# HELP sync_router_heartbeat_failures_total Total failed heartbeats
# TYPE sync_router_heartbeat_failures_total counter
sync_router_heartbeat_failures_total {heartbeat_failures}

# HELP sync_router_certificate_failures_total Total client certificates rejected
# TYPE sync_router_certificate_failures_total counter
sync_router_certificate_failures_total {cert_failures}

# HELP sync_router_token_failures_total Total bearer tokens rejected
# TYPE sync_router_token_failures_total counter
sync_router_token_failures_total {token_failures}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn counters_reflect_activity() {
        let sync = Arc::new(Synchronizer::new(Config::default()));
        sync.metrics().events_applied.fetch_add(3, Ordering::Relaxed);
        sync.metrics().token_failures.fetch_add(1, Ordering::Relaxed);

        let response = metrics_handler(Extension(sync)).await.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(body.contains("sync_router_events_applied_total 3\n"));
        assert!(body.contains("sync_router_token_failures_total 1\n"));
        assert!(body.contains("# TYPE sync_router_api_sessions gauge"));
    }
}

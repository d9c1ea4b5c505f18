//! HTTP endpoints for sync-router.
//!
//! Provides health checks, metrics, and the API-session diagnostic dump.

pub mod health;
mod metrics;

use crate::dump::dump_api_sessions;
use crate::synchronizer::Synchronizer;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(sync: Arc<Synchronizer>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/debug/api-sessions", get(api_sessions_handler))
        .layer(Extension(sync))
}

/// Dump every tracked API session as plain text.
async fn api_sessions_handler(Extension(sync): Extension<Arc<Synchronizer>>) -> impl IntoResponse {
    let mut body = Vec::new();
    match dump_api_sessions(sync.api_sessions(), &mut body).await {
        Ok(_) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!("API session dump failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                b"dump failed\n".to_vec(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use sync_types::ApiSessionRecord;
    use tower::util::ServiceExt;

    fn test_sync() -> Arc<Synchronizer> {
        Arc::new(Synchronizer::new(Config::default()))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_body(build_router(test_sync()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let (status, body) = get_body(build_router(test_sync()), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("sync_router_events_applied_total 0"));
    }

    #[tokio::test]
    async fn api_session_dump_endpoint_lists_sessions() {
        let sync = test_sync();
        sync.api_sessions()
            .add_api_session(ApiSessionRecord::new("as-1", "token-1"));

        let (status, body) = get_body(build_router(sync), "/debug/api-sessions").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1: id: as-1, token: token-1\n");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (status, _) = get_body(build_router(test_sync()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

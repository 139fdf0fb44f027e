//! HTTP trigger endpoint
//!
//! Routes:
//! - `PUT|POST /v{version}/run` - decode a request and run it to completion
//!   (the run outlives a caller that disconnects)
//! - `GET /healthz` - liveness
//!
//! Failures are answered with `"<status text>\n\n<error>"`: 500 for anything
//! going wrong before or during the run, 503 when no run slot is free.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use keel_common::Error;

use crate::reconciler::ComponentReconciler;

/// Shared state of the trigger endpoint
#[derive(Clone)]
pub struct ServerState {
    reconciler: ComponentReconciler,
    shutdown: CancellationToken,
}

/// Why a trigger request was not answered with 200
#[derive(Debug)]
pub enum RunRejection {
    /// No run slot is free
    Unavailable(Error),
    /// The request was invalid or the run failed
    Failed(Error),
}

impl IntoResponse for RunRejection {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            RunRejection::Unavailable(err) => (StatusCode::SERVICE_UNAVAILABLE, err),
            RunRejection::Failed(err) => (StatusCode::INTERNAL_SERVER_ERROR, err),
        };
        let text = status.canonical_reason().unwrap_or_default();
        (status, format!("{}\n\n{}", text, err)).into_response()
    }
}

/// Build the trigger router; runs are cancelled when `shutdown` fires
pub fn router(reconciler: ComponentReconciler, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/v{version}/run", put(run_handler).post(run_handler))
        .with_state(ServerState {
            reconciler,
            shutdown,
        })
}

async fn run_handler(
    State(state): State<ServerState>,
    Path(version): Path<String>,
    body: Bytes,
) -> Result<StatusCode, RunRejection> {
    let (request, callback) = state
        .reconciler
        .prepare_remote(&version, &body)
        .map_err(|e| {
            warn!(%version, error = %e, "rejecting invalid reconciliation request");
            RunRejection::Failed(e)
        })?;

    let permit = state.reconciler.try_admit().map_err(|e| {
        warn!(component = %request.component, error = %e, "rejecting reconciliation request");
        RunRejection::Unavailable(e)
    })?;

    state
        .reconciler
        .run_remote(request, callback, permit, state.shutdown.clone())
        .await
        .map_err(RunRejection::Failed)?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionPipeline;
    use crate::config::ReconcilerConfig;
    use crate::connector::MockClusterConnector;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn reconciler(max_concurrent_runs: usize) -> ComponentReconciler {
        let config = ReconcilerConfig::builder()
            .max_concurrent_runs(max_concurrent_runs)
            .build()
            .unwrap();
        let mut connector = MockClusterConnector::new();
        connector.expect_connect().never();
        ComponentReconciler::with_connector(config, ActionPipeline::new(), Arc::new(connector))
    }

    fn app(reconciler: ComponentReconciler) -> Router {
        router(reconciler, CancellationToken::new())
    }

    async fn send(router: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = send(app(reconciler(1)), "GET", "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn story_malformed_body_is_a_500_with_error_text() {
        let (status, body) = send(app(reconciler(1)), "PUT", "/v1/run", "{not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("Internal Server Error\n\n"));
        assert!(body.contains("failed to decode v1 reconciliation request"));
    }

    #[tokio::test]
    async fn test_run_path_requires_v_prefixed_version() {
        for uri in ["/1/run", "/latest/run"] {
            let (status, _) = send(
                app(reconciler(1)),
                "PUT",
                uri,
                r#"{"component": "istio", "callbackURL": "http://127.0.0.1:9/cb"}"#,
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_version_segment_reaches_the_decoder() {
        let (status, body) = send(app(reconciler(1)), "PUT", "/v2beta/run", "[]").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("failed to decode v2beta reconciliation request"));
    }

    #[tokio::test]
    async fn test_missing_callback_url_is_rejected() {
        let (status, body) =
            send(app(reconciler(1)), "POST", "/v1/run", r#"{"component": "istio"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("callback URL is empty"));
    }

    #[tokio::test]
    async fn test_only_put_and_post_trigger_runs() {
        let (status, _) = send(app(reconciler(1)), "GET", "/v1/run", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn story_saturated_server_answers_503() {
        let reconciler = reconciler(1);
        let _busy = reconciler.try_admit().unwrap();

        let (status, body) = send(
            app(reconciler),
            "PUT",
            "/v1/run",
            r#"{"component": "istio", "callbackURL": "http://127.0.0.1:9/cb"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.starts_with("Service Unavailable\n\n"));
        assert!(body.contains("1 reconciliations already running"));
    }
}

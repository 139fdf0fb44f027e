//! Status callback delivery
//!
//! A run reports its lifecycle through a [`CallbackHandler`]:
//! - [`LocalCallback`] calls a status function supplied in-process
//! - [`RemoteCallback`] PUTs `{"status":"..."}` to a webhook URL
//!
//! Handlers deliver exactly once per call. Retrying a failed delivery is up
//! to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use url::Url;

use keel_common::Error;

use crate::status::Status;

/// Timeout for a single remote status delivery
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process status function
pub type StatusFn = Arc<dyn Fn(Status) -> Result<(), Error> + Send + Sync>;

/// Delivers run status to whoever started the run
pub enum CallbackHandler {
    /// Status function of a direct caller
    Local(LocalCallback),
    /// Webhook of an HTTP caller
    Remote(RemoteCallback),
}

impl CallbackHandler {
    /// Deliver one status
    pub async fn callback(&self, status: Status) -> Result<(), Error> {
        match self {
            CallbackHandler::Local(local) => local.callback(status),
            CallbackHandler::Remote(remote) => remote.callback(status).await,
        }
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackHandler::Local(_) => f.write_str("CallbackHandler::Local"),
            CallbackHandler::Remote(remote) => {
                write!(f, "CallbackHandler::Remote({})", remote.url)
            }
        }
    }
}

/// Calls a status function in-process
pub struct LocalCallback {
    status_fn: StatusFn,
    debug: bool,
}

impl LocalCallback {
    /// Wrap a status function; fails when none is given
    pub fn new(status_fn: Option<StatusFn>, debug: bool) -> Result<Self, Error> {
        let status_fn = status_fn.ok_or_else(|| {
            Error::configuration_for_field("statusFunc", "no status function provided")
        })?;
        Ok(Self { status_fn, debug })
    }

    /// Call the status function, returning its error unchanged
    pub fn callback(&self, status: Status) -> Result<(), Error> {
        if self.debug {
            debug!(%status, "delivering status to local callback");
        }
        (self.status_fn)(status)
    }
}

#[derive(Serialize)]
struct StatusBody {
    status: Status,
}

/// Sends status to a webhook
pub struct RemoteCallback {
    url: Url,
    http: reqwest::Client,
    debug: bool,
}

impl RemoteCallback {
    /// Validate the callback URL; no request is made here
    pub fn new(url: &str, debug: bool) -> Result<Self, Error> {
        if url.trim().is_empty() {
            return Err(Error::configuration_for_field(
                "callbackURL",
                "callback URL is empty",
            ));
        }
        let url = Url::parse(url).map_err(|e| {
            Error::configuration_for_field("callbackURL", format!("invalid callback URL: {}", e))
        })?;
        if url.cannot_be_a_base() {
            return Err(Error::configuration_for_field(
                "callbackURL",
                format!("callback URL '{}' is not a hierarchical URL", url),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::internal_with_context(
                    "callback",
                    format!("failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self { url, http, debug })
    }

    /// PUT the status; anything but a 2xx response is a delivery error
    pub async fn callback(&self, status: Status) -> Result<(), Error> {
        let response = self
            .http
            .put(self.url.clone())
            .json(&StatusBody { status })
            .send()
            .await
            .map_err(|e| Error::callback_delivery(status.as_str(), e.to_string()))?;

        let code = response.status();
        if self.debug {
            debug!(%status, url = %self.url, code = code.as_u16(), "status delivered to remote callback");
        }
        if code.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
        Err(Error::callback_delivery(
            status.as_str(),
            format!("callback returned {}: {}", code, body),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::put;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_local_callback_requires_a_function() {
        let err = LocalCallback::new(None, false).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn story_local_callback_is_invoked_once_per_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let status_fn: StatusFn = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handler = LocalCallback::new(Some(status_fn), true).unwrap();
        handler.callback(Status::Running).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn story_local_callback_returns_the_function_error_unchanged() {
        let status_fn: StatusFn =
            Arc::new(|_| Err(Error::internal_with_context("caller", "status sink closed")));
        let handler = LocalCallback::new(Some(status_fn), false).unwrap();

        match handler.callback(Status::Success) {
            Err(Error::Internal { message, context }) => {
                assert_eq!(message, "status sink closed");
                assert_eq!(context, "caller");
            }
            other => panic!("expected the function's error, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_callback_rejects_bad_urls() {
        for url in ["", "   ", "not a url", "/relative/path", "mailto:ops@example.com"] {
            assert!(
                matches!(
                    RemoteCallback::new(url, false),
                    Err(Error::Configuration { .. })
                ),
                "accepted {:?}",
                url
            );
        }
        assert!(RemoteCallback::new("https://callbacks.example.com/hook", false).is_ok());
    }

    #[tokio::test]
    async fn story_remote_callback_delivers_status_json() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let router = Router::new().route(
            "/hook",
            put(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    StatusCode::OK
                }
            }),
        );
        let base = serve(router).await;

        let handler = RemoteCallback::new(&format!("{}/hook", base), true).unwrap();
        handler.callback(Status::Running).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.as_slice(), &[serde_json::json!({"status": "running"})]);
    }

    #[tokio::test]
    async fn story_remote_callback_reports_non_2xx_responses() {
        let router = Router::new().route(
            "/hook",
            put(|| async { (StatusCode::BAD_REQUEST, "unknown correlation id") }),
        );
        let base = serve(router).await;

        let handler = RemoteCallback::new(&format!("{}/hook", base), false).unwrap();
        let err = handler.callback(Status::Success).await.unwrap_err();

        match err {
            Error::CallbackDelivery { status, message } => {
                assert_eq!(status, "success");
                assert!(message.contains("400"));
                assert!(message.contains("unknown correlation id"));
            }
            other => panic!("expected CallbackDelivery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_callback_reports_unreadable_error_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Announce more body than is sent, then hang up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 100\r\n\r\ntrunc")
                .await
                .unwrap();
        });

        let handler = RemoteCallback::new(&format!("http://{}/hook", addr), false).unwrap();
        let err = handler.callback(Status::Error).await.unwrap_err();

        match err {
            Error::CallbackDelivery { message, .. } => {
                assert!(message.contains("502"));
                assert!(message.contains("<unreadable body:"));
            }
            other => panic!("expected CallbackDelivery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_callback_connection_failure_is_a_delivery_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = RemoteCallback::new(&format!("http://{}/hook", addr), false).unwrap();
        let err = handler.callback(Status::Running).await.unwrap_err();
        assert!(matches!(err, Error::CallbackDelivery { .. }));
    }

    #[tokio::test]
    async fn test_handler_dispatches_to_local() {
        let status_fn: StatusFn = Arc::new(|status| {
            assert_eq!(status, Status::Failed);
            Ok(())
        });
        let handler = CallbackHandler::Local(LocalCallback::new(Some(status_fn), false).unwrap());
        handler.callback(Status::Failed).await.unwrap();
    }
}

//! Entry points: direct calls and the HTTP trigger server
//!
//! Both entry points share one [`Runner`] and one admission semaphore that
//! caps the number of runs in flight. A direct caller waits for a free slot;
//! an HTTP caller is turned away with 503 when none is free.
//!
//! HTTP-triggered runs execute on their own tracked task, so a caller that
//! disconnects does not abort the run. Only the server token cancels it, and
//! the server waits for every tracked run before returning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use keel_common::Error;

use crate::action::ActionPipeline;
use crate::callback::{CallbackHandler, LocalCallback, RemoteCallback, StatusFn};
use crate::config::ReconcilerConfig;
use crate::connector::{ClusterConnector, KubeConnector};
use crate::model::{ContractVersion, ReconciliationRequest};
use crate::runner::Runner;
use crate::server::router;

/// How long in-flight requests get to report a terminal status on shutdown
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Reconciles components on request
#[derive(Clone)]
pub struct ComponentReconciler {
    runner: Arc<Runner>,
    admission: Arc<Semaphore>,
    remote_runs: TaskTracker,
}

impl ComponentReconciler {
    /// Create a reconciler connecting to clusters through kubeconfigs
    pub fn new(config: ReconcilerConfig, pipeline: ActionPipeline) -> Self {
        Self::with_connector(config, pipeline, Arc::new(KubeConnector))
    }

    /// Create a reconciler with a custom cluster connector
    pub fn with_connector(
        config: ReconcilerConfig,
        pipeline: ActionPipeline,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            runner: Arc::new(Runner::new(config, pipeline, connector)),
            admission,
            remote_runs: TaskTracker::new(),
        }
    }

    /// The configuration runs are executed with
    pub fn config(&self) -> &ReconcilerConfig {
        self.runner.config()
    }

    /// Run a reconciliation in-process, reporting through `status_fn`
    ///
    /// Waits for an admission slot first. Returns the terminal error of the
    /// run, if any.
    pub async fn start_local(
        &self,
        request: ReconciliationRequest,
        status_fn: Option<StatusFn>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let callback = CallbackHandler::Local(LocalCallback::new(status_fn, self.config().debug)?);

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("admission")),
            permit = self.admission.clone().acquire_owned() => permit.map_err(|_| {
                Error::internal_with_context("admission", "admission semaphore closed")
            })?,
        };

        self.runner.run(Arc::new(request), &callback, cancel).await
    }

    /// Take an admission slot without waiting
    pub(crate) fn try_admit(&self) -> Result<OwnedSemaphorePermit, Error> {
        self.admission
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => Error::internal_with_context(
                    "admission",
                    format!(
                        "{} reconciliations already running",
                        self.config().max_concurrent_runs
                    ),
                ),
                TryAcquireError::Closed => {
                    Error::internal_with_context("admission", "admission semaphore closed")
                }
            })
    }

    /// Decode an HTTP trigger and build its callback handler
    pub(crate) fn prepare_remote(
        &self,
        version: &str,
        body: &[u8],
    ) -> Result<(ReconciliationRequest, CallbackHandler), Error> {
        let version = ContractVersion::parse(version)?;
        let request = ReconciliationRequest::decode(&version, body)?;
        let callback_url = request.callback_url.as_deref().unwrap_or_default();
        let callback =
            CallbackHandler::Remote(RemoteCallback::new(callback_url, self.config().debug)?);
        Ok((request, callback))
    }

    /// Run a decoded HTTP trigger under an admission permit
    ///
    /// The run is spawned on a tracked task owning the request, callback and
    /// permit. Dropping the returned future leaves the run going until it
    /// reaches a terminal status.
    pub(crate) async fn run_remote(
        &self,
        request: ReconciliationRequest,
        callback: CallbackHandler,
        permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let runner = self.runner.clone();
        let run = self.remote_runs.spawn(async move {
            let _permit = permit;
            runner.run(Arc::new(request), &callback, &cancel).await
        });
        run.await.map_err(|e| {
            Error::internal_with_context("reconcile", format!("run task failed: {}", e))
        })?
    }

    /// Wait for every HTTP-triggered run to finish
    async fn drain_remote_runs(&self) {
        if !self.remote_runs.is_empty() {
            info!(
                in_flight = self.remote_runs.len(),
                "waiting for in-flight reconciliations"
            );
        }
        self.remote_runs.close();
        self.remote_runs.wait().await;
        self.remote_runs.reopen();
    }

    /// Serve the HTTP trigger endpoint until `cancel` fires
    ///
    /// Uses TLS when certificate and key are configured. On cancellation the
    /// server stops accepting, in-flight runs report `error` and the server
    /// waits for their responses.
    pub async fn start_remote(&self, cancel: CancellationToken) -> Result<(), Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config().port));

        match self.config().tls.clone() {
            Some(tls) => {
                let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|e| {
                        Error::configuration_for_field("tls", format!("TLS config error: {}", e))
                    })?;

                let handle = axum_server::Handle::new();
                let shutdown = handle.clone();
                let token = cancel.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
                });

                info!(%addr, "starting reconciliation server (TLS)");
                let served = axum_server::bind_rustls(addr, tls_config)
                    .handle(handle)
                    .serve(router(self.clone(), cancel).into_make_service())
                    .await
                    .map_err(|e| {
                        Error::internal_with_context("server", format!("server error: {}", e))
                    });
                self.drain_remote_runs().await;
                info!("reconciliation server stopped");
                served
            }
            None => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    Error::internal_with_context("server", format!("failed to bind {}: {}", addr, e))
                })?;
                self.serve(listener, cancel).await
            }
        }
    }

    /// Serve plain HTTP on an already bound listener until `cancel` fires
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), Error> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "starting reconciliation server");
        }
        let shutdown = cancel.clone();
        let served = axum::serve(listener, router(self.clone(), cancel))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::internal_with_context("server", format!("server error: {}", e)));
        self.drain_remote_runs().await;
        info!("reconciliation server stopped");
        served
    }
}

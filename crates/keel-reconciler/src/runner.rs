//! The reconciliation run loop
//!
//! One run drives a request to a terminal status:
//!
//! 1. Resolve the resources to wait for and connect to the cluster
//! 2. Per attempt: report `Running`, run the action pipeline, wait for readiness
//! 3. On failure report `Failed`, pause `retry_delay` and try again
//! 4. Finish with `Success`, or `Error` once attempts run out
//!
//! Every await is bound to the run's cancellation token and hard deadline.
//! Cancellation and deadline end the run immediately with `Error`; they are
//! never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use keel_common::Error;
use keel_progress::ProgressTracker;

use crate::action::{ActionContext, ActionPipeline};
use crate::callback::CallbackHandler;
use crate::config::ReconcilerConfig;
use crate::connector::ClusterConnector;
use crate::model::ReconciliationRequest;
use crate::status::Status;

/// Cancellation token and deadline of one run
struct RunContext {
    cancel: CancellationToken,
    deadline: Instant,
    run_deadline: Duration,
}

impl RunContext {
    fn new(parent: &CancellationToken, run_deadline: Duration) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: Instant::now() + run_deadline,
            run_deadline,
        }
    }

    /// Run `fut` unless the run is cancelled or its deadline passes first
    async fn guard<T, F>(&self, context: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled(context)),
            _ = tokio::time::sleep_until(self.deadline) => {
                self.cancel.cancel();
                Err(Error::DeadlineExceeded { deadline: self.run_deadline })
            }
            result = fut => result,
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        self.guard("retry-delay", async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Executes reconciliation runs with a fixed configuration and pipeline
pub struct Runner {
    config: ReconcilerConfig,
    pipeline: ActionPipeline,
    connector: Arc<dyn ClusterConnector>,
}

impl Runner {
    /// Create a runner
    pub fn new(
        config: ReconcilerConfig,
        pipeline: ActionPipeline,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            config,
            pipeline,
            connector,
        }
    }

    /// The configuration runs are executed with
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Drive one request to a terminal status
    ///
    /// The run stops early when `cancel` fires; it always reports a terminal
    /// status through `callback` before returning.
    pub async fn run(
        &self,
        request: Arc<ReconciliationRequest>,
        callback: &CallbackHandler,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let span = info_span!(
            "reconcile",
            component = %request.component,
            version = %request.version,
            correlation_id = %request.correlation_id,
        );
        let ctx = RunContext::new(cancel, self.config.run_deadline);
        self.execute(request, callback, &ctx).instrument(span).await
    }

    async fn execute(
        &self,
        request: Arc<ReconciliationRequest>,
        callback: &CallbackHandler,
        ctx: &RunContext,
    ) -> Result<(), Error> {
        let resources = match request.tracked_resources() {
            Ok(resources) => resources,
            Err(e) => return self.fail(callback, e).await,
        };
        let client = match ctx.guard("connect", self.connect(&request)).await {
            Ok(client) => client,
            Err(e) => return self.fail(callback, e).await,
        };

        let action_ctx = ActionContext {
            version: request.version.clone(),
            request: request.clone(),
            client: client.clone(),
        };
        let tracker = ProgressTracker::new(
            client,
            resources,
            self.config.update_interval,
            self.config.tracker_timeout,
        );
        let max_retries = self.config.max_retries;

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(attempt, max_retries, "starting attempt");
            self.notify(callback, Status::Running).await;

            let outcome = ctx
                .guard("attempt", async {
                    self.pipeline.execute(&action_ctx).await?;
                    tracker.watch(&ctx.cancel).await
                })
                .await;

            let err = match outcome {
                Ok(()) => return self.succeed(callback, attempt).await,
                Err(e) if !e.is_retryable() => return self.fail(callback, e).await,
                Err(e) => e,
            };

            if attempt >= max_retries {
                let exhausted = Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                };
                return self.fail(callback, exhausted).await;
            }

            warn!(attempt, error = %err, retry_delay = ?self.config.retry_delay, "attempt failed, retrying");
            self.notify(callback, Status::Failed).await;
            if let Err(e) = ctx.sleep(self.config.retry_delay).await {
                return self.fail(callback, e).await;
            }
        }
    }

    async fn connect(
        &self,
        request: &ReconciliationRequest,
    ) -> Result<Arc<dyn keel_progress::ClusterClient>, Error> {
        self.connector.connect(request).await.map_err(|e| match e {
            Error::Configuration { .. } => e,
            other => Error::configuration_for_field(
                "kubeconfig",
                format!("failed to connect to cluster: {}", other),
            ),
        })
    }

    /// Deliver a non-terminal status; failures are logged only
    async fn notify(&self, callback: &CallbackHandler, status: Status) {
        if let Err(e) = callback.callback(status).await {
            warn!(%status, error = %e, "status delivery failed, caller may be unaware of progress");
        }
    }

    async fn succeed(&self, callback: &CallbackHandler, attempt: u32) -> Result<(), Error> {
        info!(attempt, "reconciliation succeeded");
        callback
            .callback(Status::Success)
            .await
            .map_err(|e| match e {
                Error::CallbackDelivery { .. } => e,
                other => Error::callback_delivery(Status::Success.as_str(), other.to_string()),
            })
    }

    async fn fail(&self, callback: &CallbackHandler, err: Error) -> Result<(), Error> {
        error!(error = %err, "reconciliation failed");
        if let Err(e) = callback.callback(Status::Error).await {
            warn!(error = %e, "terminal status delivery failed");
        }
        Err(err)
    }
}

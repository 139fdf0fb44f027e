//! Polling readiness tracker
//!
//! Watches a set of tracked resources until every one reports ready, the
//! timeout elapses, or the run is cancelled. Resources are re-checked on a
//! fixed cadence and dropped from the pending set once ready; a failed check
//! only means the resource is looked at again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_common::Error;

use crate::client::ClusterClient;
use crate::ready::is_resource_ready;
use crate::resource::TrackedResource;

/// Cancellation context reported when a readiness wait is interrupted
const CANCEL_CONTEXT: &str = "readiness";

/// Waits for a fixed set of resources to converge
pub struct ProgressTracker {
    client: Arc<dyn ClusterClient>,
    resources: Vec<TrackedResource>,
    interval: Duration,
    timeout: Duration,
}

impl ProgressTracker {
    /// Create a tracker polling every `interval` for at most `timeout`
    pub fn new(
        client: Arc<dyn ClusterClient>,
        resources: Vec<TrackedResource>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            resources,
            interval,
            timeout,
        }
    }

    /// Block until all resources are ready
    ///
    /// The first check runs immediately. Returns [`Error::ReadinessTimeout`]
    /// listing the resources still pending when the timeout elapses, and
    /// [`Error::Cancelled`] as soon as `cancel` fires.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let mut pending = self.resources.clone();
        if pending.is_empty() {
            debug!("no resources to track");
            return Ok(());
        }

        let deadline = Instant::now() + self.timeout;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            resources = pending.len(),
            interval = ?self.interval,
            timeout = ?self.timeout,
            "waiting for resources to become ready"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(CANCEL_CONTEXT)),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(&pending)),
                _ = ticker.tick() => {}
            }

            let still_pending = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(CANCEL_CONTEXT)),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(&pending)),
                still = self.evaluate(&pending) => still,
            };
            pending = still_pending;

            if pending.is_empty() {
                info!(resources = self.resources.len(), "all resources ready");
                return Ok(());
            }
            debug!(pending = pending.len(), "resources not ready yet");
        }
    }

    /// Check every pending resource once, returning those not yet ready
    async fn evaluate(&self, pending: &[TrackedResource]) -> Vec<TrackedResource> {
        let mut still_pending = Vec::with_capacity(pending.len());
        for resource in pending {
            match is_resource_ready(self.client.as_ref(), resource).await {
                Ok(true) => debug!(resource = %resource, "resource ready"),
                Ok(false) => still_pending.push(resource.clone()),
                Err(e) => {
                    debug!(resource = %resource, error = %e, "readiness check failed, will retry");
                    still_pending.push(resource.clone());
                }
            }
        }
        still_pending
    }

    fn timed_out(&self, pending: &[TrackedResource]) -> Error {
        Error::ReadinessTimeout {
            timeout: self.timeout,
            pending: pending.iter().map(ToString::to_string).collect(),
        }
    }
}

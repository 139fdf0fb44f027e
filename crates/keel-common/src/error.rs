//! Error types for keel reconciliations
//!
//! Errors are structured with fields so that a failed run can be reported
//! with enough context to tell *which* stage, resource or callback failed.
//! The variants follow the failure categories of a reconciliation run:
//! configuration problems are surfaced immediately, action and readiness
//! failures are recovered by the retry loop, and callback delivery failures
//! are kept apart from run outcomes.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid request, contract version, callback target or configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The offending field (e.g., "callbackURL", "maxRetries")
        field: Option<String>,
    },

    /// A pipeline stage reported failure
    #[error("action error [{stage}]: {message}")]
    Action {
        /// Pipeline stage that failed (pre-install, install, post-install)
        stage: String,
        /// Description of what failed
        message: String,
    },

    /// Readiness of a tracked resource could not be determined
    #[error("readiness check failed for {resource}: {message}")]
    ReadinessFetch {
        /// Resource reference (Kind/namespace/name)
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Tracked resources did not become ready in time
    #[error("resources not ready after {timeout:?}: {}", .pending.join(", "))]
    ReadinessTimeout {
        /// The readiness deadline that elapsed
        timeout: Duration,
        /// Resources still not ready when the deadline elapsed
        pending: Vec<String>,
    },

    /// A status notification could not be delivered
    #[error("callback delivery of status '{status}' failed: {message}")]
    CallbackDelivery {
        /// Status that was being delivered
        status: String,
        /// Description of what failed (status code and body for remote callbacks)
        message: String,
    },

    /// All attempts were consumed without success
    #[error("reconciliation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The failure of the last attempt
        #[source]
        source: Box<Error>,
    },

    /// The run was cancelled by its caller or by server shutdown
    #[error("cancelled [{context}]")]
    Cancelled {
        /// Where the cancellation was observed (e.g., "readiness", "retry-delay")
        context: String,
    },

    /// The hard per-run deadline elapsed
    #[error("run deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        /// The configured deadline
        deadline: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "server", "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn configuration_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an action error for a pipeline stage
    pub fn action(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Action {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Create a readiness fetch error for a resource reference
    pub fn readiness_fetch(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReadinessFetch {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a callback delivery error
    pub fn callback_delivery(status: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CallbackDelivery {
            status: status.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error observed in the given context
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error counts against the retry budget of a run
    ///
    /// Configuration, callback and cancellation errors are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::Action { .. } => true,
            Error::ReadinessFetch { .. } => true,
            Error::ReadinessTimeout { .. } => true,
            Error::Configuration { .. } => false,
            Error::CallbackDelivery { .. } => false,
            Error::RetriesExhausted { .. } => false,
            Error::Cancelled { .. } => false,
            Error::DeadlineExceeded { .. } => false,
            Error::Internal { .. } => false,
        }
    }

    /// Check if this error means the run was stopped from the outside
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::DeadlineExceeded { .. })
    }
}

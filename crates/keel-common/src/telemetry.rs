//! Tracing initialization
//!
//! Sets up a `tracing-subscriber` registry with:
//! - an `EnvFilter` read from `RUST_LOG` (with a sensible default)
//! - JSON structured logging including the current span

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,keel=info,kube=info,tower=warn,hyper=warn";
/// Default filter when debug output is requested
const DEBUG_FILTER: &str = "info,keel=debug,keel_common=debug,keel_progress=debug,keel_reconciler=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line (e.g., "keel-reconciler")
    pub service_name: String,
    /// Raise keel targets to debug level when `RUST_LOG` is not set
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "keel".to_string(),
            debug: false,
        }
    }
}

impl TelemetryConfig {
    /// The filter directive used when `RUST_LOG` is absent
    pub fn default_filter(&self) -> &'static str {
        if self.debug {
            DEBUG_FILTER
        } else {
            DEFAULT_FILTER
        }
    }
}

/// Initialize tracing with the given configuration
///
/// Fails if a global subscriber has already been installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::info!(service = %config.service_name, debug = config.debug, "telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_follows_debug_flag() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_filter(), DEFAULT_FILTER);

        let config = TelemetryConfig {
            debug: true,
            ..Default::default()
        };
        assert!(config.default_filter().contains("keel_reconciler=debug"));
    }

    #[test]
    fn test_default_filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(DEBUG_FILTER).is_ok());
    }
}

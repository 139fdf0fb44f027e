//! Reconciler configuration
//!
//! [`ReconcilerConfig`] is built once through [`ReconcilerConfigBuilder`] and
//! never changes afterwards. Unset or zero values fall back to defaults;
//! contradictory settings are rejected at build time.

use std::path::PathBuf;
use std::time::Duration;

use keel_common::{Error, DEFAULT_SERVER_PORT};

/// Default readiness poll cadence
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
/// Default number of attempts per run
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Default limit on one readiness wait
pub const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default number of runs allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 16;
/// Default hard limit on the lifetime of one run
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// TLS material for the trigger endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Validated reconciler settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Cadence of readiness checks
    pub update_interval: Duration,
    /// Attempts before a run gives up
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Limit on one readiness wait
    pub tracker_timeout: Duration,
    /// Port of the trigger endpoint
    pub port: u16,
    /// TLS files, when the endpoint is served over HTTPS
    pub tls: Option<TlsFiles>,
    /// Runs allowed in flight at once
    pub max_concurrent_runs: usize,
    /// Hard limit on the lifetime of one run
    pub run_deadline: Duration,
    /// Log every status delivery
    pub debug: bool,
}

impl ReconcilerConfig {
    /// Start building a configuration
    pub fn builder() -> ReconcilerConfigBuilder {
        ReconcilerConfigBuilder::default()
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            tracker_timeout: DEFAULT_TRACKER_TIMEOUT,
            port: DEFAULT_SERVER_PORT,
            tls: None,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            run_deadline: DEFAULT_RUN_DEADLINE,
            debug: false,
        }
    }
}

/// Builder for [`ReconcilerConfig`]
#[derive(Clone, Debug, Default)]
pub struct ReconcilerConfigBuilder {
    update_interval: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    tracker_timeout: Option<Duration>,
    port: Option<u16>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    max_concurrent_runs: Option<usize>,
    run_deadline: Option<Duration>,
    debug: bool,
}

impl ReconcilerConfigBuilder {
    /// Cadence of readiness checks
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Attempts before a run gives up
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Fixed pause between attempts
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Limit on one readiness wait
    pub fn tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = Some(timeout);
        self
    }

    /// Readiness cadence and timeout together
    pub fn progress_tracker(self, interval: Duration, timeout: Duration) -> Self {
        self.update_interval(interval).tracker_timeout(timeout)
    }

    /// Port of the trigger endpoint
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Serve the trigger endpoint over TLS
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls_cert = Some(cert_path.into());
        self.tls_key = Some(key_path.into());
        self
    }

    /// TLS certificate path alone
    pub fn tls_cert(mut self, cert_path: Option<PathBuf>) -> Self {
        self.tls_cert = cert_path;
        self
    }

    /// TLS key path alone
    pub fn tls_key(mut self, key_path: Option<PathBuf>) -> Self {
        self.tls_key = key_path;
        self
    }

    /// Runs allowed in flight at once
    pub fn max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = Some(runs);
        self
    }

    /// Hard limit on the lifetime of one run
    pub fn run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    /// Log every status delivery
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Apply defaults and validate
    pub fn build(self) -> Result<ReconcilerConfig, Error> {
        let update_interval = non_zero(self.update_interval, DEFAULT_UPDATE_INTERVAL);
        let tracker_timeout = non_zero(self.tracker_timeout, DEFAULT_TRACKER_TIMEOUT);
        let run_deadline = non_zero(self.run_deadline, DEFAULT_RUN_DEADLINE);

        if update_interval > tracker_timeout {
            return Err(Error::configuration_for_field(
                "updateInterval",
                format!(
                    "update interval {:?} exceeds tracker timeout {:?}",
                    update_interval, tracker_timeout
                ),
            ));
        }
        if run_deadline < tracker_timeout {
            return Err(Error::configuration_for_field(
                "runDeadline",
                format!(
                    "run deadline {:?} is shorter than tracker timeout {:?}",
                    run_deadline, tracker_timeout
                ),
            ));
        }

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsFiles {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::configuration_for_field(
                    "tlsKey",
                    "TLS certificate given without a key",
                ))
            }
            (None, Some(_)) => {
                return Err(Error::configuration_for_field(
                    "tlsCert",
                    "TLS key given without a certificate",
                ))
            }
        };

        Ok(ReconcilerConfig {
            update_interval,
            max_retries: self
                .max_retries
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: non_zero(self.retry_delay, DEFAULT_RETRY_DELAY),
            tracker_timeout,
            port: self.port.filter(|p| *p > 0).unwrap_or(DEFAULT_SERVER_PORT),
            tls,
            max_concurrent_runs: self
                .max_concurrent_runs
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS),
            run_deadline,
            debug: self.debug,
        })
    }
}

fn non_zero(value: Option<Duration>, default: Duration) -> Duration {
    value.filter(|d| !d.is_zero()).unwrap_or(default)
}

//! keel-reconciler - serves the component reconciliation trigger endpoint

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keel_common::telemetry::{init_telemetry, TelemetryConfig};
use keel_common::DEFAULT_SERVER_PORT;
use keel_reconciler::{ActionPipeline, ApplyManifest, ComponentReconciler, ReconcilerConfig};

/// Reconcile Kubernetes components on request and report their status
#[derive(Parser, Debug)]
#[command(name = "keel-reconciler", version, about, long_about = None)]
struct Cli {
    /// Port of the trigger endpoint
    #[arg(long, env = "KEEL_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Attempts per reconciliation
    #[arg(long, env = "KEEL_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Seconds between readiness checks
    #[arg(long, env = "KEEL_UPDATE_INTERVAL_SECS", default_value_t = 30)]
    update_interval_secs: u64,

    /// Seconds to pause between attempts
    #[arg(long, env = "KEEL_RETRY_DELAY_SECS", default_value_t = 30)]
    retry_delay_secs: u64,

    /// Seconds one readiness wait may take
    #[arg(long, env = "KEEL_TRACKER_TIMEOUT_SECS", default_value_t = 600)]
    tracker_timeout_secs: u64,

    /// Reconciliations allowed in flight at once
    #[arg(long, env = "KEEL_MAX_CONCURRENT_RUNS", default_value_t = 16)]
    max_concurrent_runs: usize,

    /// Hard limit in seconds on one reconciliation
    #[arg(long, env = "KEEL_RUN_DEADLINE_SECS", default_value_t = 1800)]
    run_deadline_secs: u64,

    /// PEM certificate for serving over TLS
    #[arg(long, env = "KEEL_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for serving over TLS
    #[arg(long, env = "KEEL_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Verbose logging of status deliveries
    #[arg(long, env = "KEEL_DEBUG")]
    debug: bool,
}

impl Cli {
    fn config(&self) -> keel_common::Result<ReconcilerConfig> {
        ReconcilerConfig::builder()
            .port(self.port)
            .max_retries(self.max_retries)
            .progress_tracker(
                Duration::from_secs(self.update_interval_secs),
                Duration::from_secs(self.tracker_timeout_secs),
            )
            .retry_delay(Duration::from_secs(self.retry_delay_secs))
            .max_concurrent_runs(self.max_concurrent_runs)
            .run_deadline(Duration::from_secs(self.run_deadline_secs))
            .tls_cert(self.tls_cert.clone())
            .tls_key(self.tls_key.clone())
            .debug(self.debug)
            .build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS config is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "keel-reconciler".to_string(),
        debug: cli.debug,
    })?;

    let config = cli.config()?;
    info!(?config, "configuration loaded");

    let pipeline = ActionPipeline::new().with_install(Arc::new(ApplyManifest));
    let reconciler = ComponentReconciler::new(config, pipeline);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    reconciler.start_remote(cancel).await?;
    Ok(())
}

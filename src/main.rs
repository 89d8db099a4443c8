use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keylimit::config::{KeyConfig, ProbeConfig, ProbeMode};
use keylimit::probe::{Probe, ProbeReport};
use keylimit::{LimiterTable, Quota};

/// Drive a per-key rate limiter from concurrent workers and report the outcome.
#[derive(Debug, Parser)]
#[command(name = "keylimit-probe", version, about)]
struct Args {
    /// YAML probe configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Operations issued by each worker
    #[arg(short, long)]
    requests: Option<usize>,

    /// Limiter operation to exercise
    #[arg(short, long, value_enum)]
    mode: Option<ProbeMode>,

    /// Seed for key selection
    #[arg(long)]
    seed: Option<u64>,

    /// Add a key (combine with --max-uses and --recovery-ms)
    #[arg(short, long)]
    key: Option<String>,

    /// Quota ceiling for --key
    #[arg(long, default_value_t = 10)]
    max_uses: u64,

    /// Window length for --key in milliseconds
    #[arg(long, default_value_t = 1000)]
    recovery_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_file(path)?,
            None => ProbeConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(requests) = self.requests {
            config.requests = requests;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(key) = &self.key {
            config.keys.push(KeyConfig {
                key: key.clone(),
                quota: Quota::new(self.max_uses, Duration::from_millis(self.recovery_ms)),
            });
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = args.probe_config()?;
    info!(workers = config.workers, mode = ?config.mode, "Configuration loaded");

    let table = Arc::new(LimiterTable::new());
    let probe = Probe::new(config, table)?;

    tokio::select! {
        report = probe.run() => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                log_report(&report);
            }
        }
        _ = shutdown_signal() => {
            warn!("Probe interrupted before completion");
        }
    }

    Ok(())
}

fn log_report(report: &ProbeReport) {
    for key in &report.keys {
        info!(
            key = %key.key,
            granted = key.granted,
            denied = key.denied,
            "Key result"
        );
    }
    info!(
        elapsed_ms = report.elapsed_ms,
        granted = report.total_granted(),
        denied = report.total_denied(),
        "Probe finished"
    );
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping probe");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping probe");
        }
    }
}

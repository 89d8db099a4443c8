//! Load probe that drives a shared limiter from many concurrent workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{KeyConfig, ProbeConfig, ProbeMode};
use crate::error::Result;
use crate::ratelimit::LimiterTable;

/// Outcome counts for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    /// The key name
    pub key: String,
    /// Operations that consumed a use
    pub granted: u64,
    /// Non-blocking checks that were refused
    pub denied: u64,
}

/// Summary of a probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Operation that was exercised
    pub mode: ProbeMode,
    /// Number of workers
    pub workers: usize,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
    /// Per-key results, in configuration order
    pub keys: Vec<KeyReport>,
}

impl ProbeReport {
    /// Total operations that consumed a use.
    pub fn total_granted(&self) -> u64 {
        self.keys.iter().map(|k| k.granted).sum()
    }

    /// Total refused checks.
    pub fn total_denied(&self) -> u64 {
        self.keys.iter().map(|k| k.denied).sum()
    }
}

#[derive(Default)]
struct KeyCounters {
    granted: AtomicU64,
    denied: AtomicU64,
}

/// Drives a shared [`LimiterTable`] according to a [`ProbeConfig`].
pub struct Probe {
    config: ProbeConfig,
    table: Arc<LimiterTable>,
}

impl Probe {
    /// Create a probe over `table`.
    ///
    /// Except in [`ProbeMode::WaitOrConfigure`], every configured key is
    /// registered on the table up front.
    pub fn new(config: ProbeConfig, table: Arc<LimiterTable>) -> Result<Self> {
        config.validate()?;

        if config.mode != ProbeMode::WaitOrConfigure {
            for KeyConfig { key, quota } in &config.keys {
                table.configure(key.as_str(), quota.max_uses, quota.recovery);
            }
        }

        Ok(Self { config, table })
    }

    /// Run all workers to completion and collect the results.
    pub async fn run(&self) -> ProbeReport {
        let keys = Arc::new(self.config.keys.clone());
        let counters: Arc<Vec<KeyCounters>> =
            Arc::new(keys.iter().map(|_| KeyCounters::default()).collect());

        info!(
            workers = self.config.workers,
            requests = self.config.requests,
            mode = ?self.config.mode,
            keys = keys.len(),
            "Starting probe"
        );

        let started = Instant::now();
        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let table = Arc::clone(&self.table);
                let keys = Arc::clone(&keys);
                let counters = Arc::clone(&counters);
                let mode = self.config.mode;
                let requests = self.config.requests;
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
                    None => StdRng::from_entropy(),
                };

                tokio::spawn(async move {
                    for _ in 0..requests {
                        let index = rng.gen_range(0..keys.len());
                        let KeyConfig { key, quota } = &keys[index];

                        let granted = match mode {
                            ProbeMode::Check => table.check_allowed(key.as_str()),
                            ProbeMode::Wait => {
                                table.wait_until_allowed_async(key.as_str()).await;
                                true
                            }
                            ProbeMode::WaitOrConfigure => {
                                table
                                    .wait_or_configure_async(
                                        key.as_str(),
                                        quota.max_uses,
                                        quota.recovery,
                                    )
                                    .await;
                                true
                            }
                        };

                        let counter = &counters[index];
                        if granted {
                            counter.granted.fetch_add(1, Ordering::Relaxed);
                        } else {
                            counter.denied.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    debug!(worker = worker, "Worker finished");
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Probe worker failed");
            }
        }

        let elapsed = started.elapsed();
        let reports = keys
            .iter()
            .zip(counters.iter())
            .map(|(key, counter)| KeyReport {
                key: key.key.clone(),
                granted: counter.granted.load(Ordering::Relaxed),
                denied: counter.denied.load(Ordering::Relaxed),
            })
            .collect();

        ProbeReport {
            mode: self.config.mode,
            workers: self.config.workers,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            keys: reports,
        }
    }
}

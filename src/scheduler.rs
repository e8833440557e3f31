//! Run scheduling.
//!
//! A single owned scheduler instance polls due configs on a fixed tick and
//! fans runs out to a bounded pool, at most one active run per config.
//! Configs proceed independently; there is no ordering guarantee between
//! them, and one config's failure never halts the loop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::AutomationConfig;
use crate::repository::{DbContext, StoreError};
use crate::sourcing::SourcingService;

fn default_tick_secs() -> u64 {
    30
}

fn default_max_concurrent_runs() -> usize {
    4
}

/// Scheduler pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-config polls.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Bound on concurrently executing runs across all configs.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

/// Owns the tick loop and per-config run locks.
pub struct Scheduler {
    ctx: DbContext,
    service: Arc<SourcingService>,
    config: SchedulerConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    run_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(ctx: DbContext, service: Arc<SourcingService>, config: SchedulerConfig) -> Self {
        let run_permits = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self {
            ctx,
            service,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            run_permits,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop and cancels in-flight runs when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the tick loop until shutdown, then wait for in-flight runs to
    /// finalize their logs.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "Scheduler started (tick every {}s, {} concurrent runs)",
            self.config.tick_secs, self.config.max_concurrent_runs
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!("Scheduler tick failed: {}", err);
                    }
                }
            }
        }

        self.drain(Duration::from_secs(30)).await;
        info!("Scheduler stopped");
    }

    /// One poll: dispatch every due config that passes the pause check and
    /// is not already running. Returns how many runs were dispatched.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let due = self.ctx.automations().list_due(now)?;
        let mut dispatched = 0;

        for config in due {
            // Pause mode: when the target is reached the config stays
            // enabled, but no search runs until review drops the live
            // total back under the target.
            if !config.disable_on_target && config.target_count > 0 {
                let live = self.ctx.proposals().count_active(&config.tenant_id)?;
                if live >= config.target_count {
                    debug!(
                        "Config {} at target ({}/{}), skipping run",
                        config.id, live, config.target_count
                    );
                    continue;
                }
            }

            // Per-config reentrancy lock. Held means a prior run is still
            // in flight: skip the tick, never queue.
            if !self.in_flight.lock().unwrap().insert(config.id.clone()) {
                debug!("Run already in flight for config {}, skipping tick", config.id);
                continue;
            }

            // Advance the schedule unconditionally so a failing config is
            // retried on its interval instead of busy-looping.
            let next_run_at = now + config.interval();
            if let Err(err) = self.ctx.automations().reschedule(&config.id, next_run_at, now) {
                error!("Failed to reschedule config {}: {}", config.id, err);
                self.in_flight.lock().unwrap().remove(&config.id);
                continue;
            }

            dispatched += 1;
            self.spawn_run(config);
        }

        Ok(dispatched)
    }

    fn spawn_run(&self, config: AutomationConfig) {
        let service = self.service.clone();
        let in_flight = self.in_flight.clone();
        let permits = self.run_permits.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    in_flight.lock().unwrap().remove(&config.id);
                    return;
                }
            };

            match service.execute_run(&config, &cancel).await {
                Ok(report) => info!(
                    "Run {} for config {} finished {:?}: {} prospects, {} duplicates, {} proposals",
                    report.run_id,
                    config.id,
                    report.status,
                    report.prospects_found,
                    report.duplicates,
                    report.proposals_created
                ),
                Err(err) => warn!("Run for config {} did not start: {}", config.id, err),
            }

            in_flight.lock().unwrap().remove(&config.id);
        });
    }

    /// Wait until all in-flight runs have cleared their locks.
    pub async fn drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.lock().unwrap().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Shutdown drain timed out with runs still in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

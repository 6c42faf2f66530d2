//! Scheduler - Drives reconciliation cycles on a fixed interval until cancelled

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::TrackerError;
use super::reconcile::{CycleReport, Reconciler};
use super::settings::TrackerConfig;

/// Runs one reconciliation cycle per interval, never overlapping cycles
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    config: TrackerConfig,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: TrackerConfig) -> Self {
        Self { reconciler, config }
    }

    /// Run cycles until `cancel` fires, returning the number of cycles run.
    ///
    /// The first cycle starts immediately. Cancellation is only observed
    /// between cycles; the wait for the next tick ends as soon as it fires.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycles = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            cycles += 1;
            // Failures are logged inside; the loop always continues
            let _ = self.run_cycle(cycles).await;
        }

        info!("Scheduler stopped after {} cycles", cycles);
        cycles
    }

    /// Run exactly `count` cycles back to back
    pub async fn run_cycles(&self, count: usize) -> Vec<Result<CycleReport, TrackerError>> {
        let mut outcomes = Vec::with_capacity(count);
        for cycle in 1..=count {
            outcomes.push(self.run_cycle(cycle).await);
        }
        outcomes
    }

    async fn run_cycle(&self, cycle: usize) -> Result<CycleReport, TrackerError> {
        let reconciler = Arc::clone(&self.reconciler);
        let username = self.config.username.clone();

        // SQLite and the process table are blocking; keep them off the runtime threads
        let outcome = tokio::task::spawn_blocking(move || reconciler.reconcile(&username))
            .await
            .map_err(|e| TrackerError::CycleAborted(e.to_string()))
            .and_then(|result| result);

        match &outcome {
            Ok(report) => info!("Cycle {} for {}: {}", cycle, self.config.username, report),
            Err(e) => error!("Error while checking processes (cycle {}): {}", cycle, e),
        }
        outcome
    }
}

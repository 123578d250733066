//! Recurrent task scheduling.
//!
//! A `RecurrentTask` runs a unit of work, measures how long it took, and
//! sleeps `max(desired - elapsed, min)` before the next run. Slow work never
//! piles up runs behind it, and the floor interval is always honoured.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub elapsed: Duration,
    pub next_delay: Duration,
    pub failed: bool,
}

/// A self-rescheduling periodic task with a floor interval.
#[derive(Debug, Clone)]
pub struct RecurrentTask {
    label: String,
    desired_interval: Duration,
    min_interval: Duration,
}

impl RecurrentTask {
    pub fn new(label: impl Into<String>, desired_interval: Duration, min_interval: Duration) -> Self {
        Self {
            label: label.into(),
            desired_interval,
            min_interval,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Delay before the next run given how long the last one took.
    pub fn next_delay(&self, elapsed: Duration) -> Duration {
        self.desired_interval
            .saturating_sub(elapsed)
            .max(self.min_interval)
    }

    /// Run the task once. Errors are logged, never propagated.
    pub async fn run_once<F, Fut>(&self, task: &mut F) -> TickReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let start = Instant::now();
        let failed = match task().await {
            Ok(()) => false,
            Err(e) => {
                error!(task = %self.label, error = %e, "recurrent task failed");
                true
            }
        };
        let elapsed = start.elapsed();
        let next_delay = self.next_delay(elapsed);

        debug!(
            task = %self.label,
            elapsed_ms = elapsed.as_millis() as u64,
            next_delay_ms = next_delay.as_millis() as u64,
            "recurrent task finished"
        );

        TickReport {
            elapsed,
            next_delay,
            failed,
        }
    }

    /// Run until the shutdown signal flips. An in-flight run is always
    /// allowed to finish.
    pub async fn run<F, Fut>(&self, mut task: F, mut shutdown: watch::Receiver<bool>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        info!(
            task = %self.label,
            desired_secs = self.desired_interval.as_secs(),
            min_secs = self.min_interval.as_secs(),
            "recurrent task started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_once(&mut task).await;

            tokio::select! {
                _ = tokio::time::sleep(report.next_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(task = %self.label, "recurrent task stopped");
    }
}

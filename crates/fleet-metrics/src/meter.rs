//! Metering engine: turns uptime and allocation deltas into DCU usage.
//!
//! Each tick walks every instance with a status, compares it against the
//! previous tick's `UsageSnapshot`, emits usage increments, and overwrites
//! the snapshot. A single delta is capped at two tick periods so a missed
//! tick or a process restart never over-bills.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use fleet_core::{RecurrentTask, epoch_millis};
use fleet_state::{RunningStatus, StateStore, TenancyResolver, WorkloadInstance, WorkloadStatus};
use fleet_status::status_gauge;

use crate::cache::{UsageCache, UsageSnapshot};
use crate::registry::{InstanceLabels, MetricsSink};

#[derive(Debug, Error)]
pub enum MeteringError {
    #[error("namespace {0} does not belong to a project")]
    UnknownProject(String),
}

/// Counts from one metering tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub metered: usize,
    pub failed: usize,
    pub evicted: usize,
    pub emitted_dcu: u64,
}

/// Minutes between `a` and `b` (both seconds), capped at two tick periods.
/// Returns `None` when `a` is not after `b`.
pub fn diff_minutes(a_secs: f64, b_secs: f64, interval_secs: u64) -> Option<f64> {
    let delta = a_secs - b_secs;
    if delta <= 0.0 {
        return None;
    }
    Some(delta.min(2.0 * interval_secs as f64) / 60.0)
}

pub struct MeteringEngine {
    store: StateStore,
    sink: Arc<dyn MetricsSink>,
    tenancy: Arc<dyn TenancyResolver>,
    cache: UsageCache,
    interval_secs: u64,
}

impl MeteringEngine {
    pub fn new(
        store: StateStore,
        sink: Arc<dyn MetricsSink>,
        tenancy: Arc<dyn TenancyResolver>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            sink,
            tenancy,
            cache: UsageCache::new(),
            interval_secs,
        }
    }

    pub fn cache(&self) -> &UsageCache {
        &self.cache
    }

    pub async fn tick(&self) -> anyhow::Result<TickSummary> {
        self.tick_at(epoch_millis()).await
    }

    /// Run one metering pass as of `now_ms`.
    pub async fn tick_at(&self, now_ms: u64) -> anyhow::Result<TickSummary> {
        let instances = self.store.list_instances()?;
        let mut summary = TickSummary::default();
        let mut live = HashSet::with_capacity(instances.len());

        for instance in &instances {
            live.insert(instance.uid.clone());
            let Some(status) = &instance.status else {
                continue;
            };
            match self.meter_instance(instance, status, now_ms).await {
                Ok(emitted) => {
                    summary.metered += 1;
                    summary.emitted_dcu += emitted;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        namespace = %instance.namespace,
                        name = %instance.name,
                        error = %e,
                        "metering failed"
                    );
                }
            }
        }

        let evicted = self.cache.retain_live(&live).await;
        for (uid, snapshot) in &evicted {
            debug!(%uid, "evicted usage snapshot");
            if let Some(labels) = &snapshot.labels {
                self.sink.forget(labels);
            }
        }
        summary.evicted = evicted.len();

        debug!(
            metered = summary.metered,
            failed = summary.failed,
            evicted = summary.evicted,
            emitted_dcu = summary.emitted_dcu,
            "metering tick complete"
        );
        Ok(summary)
    }

    async fn meter_instance(
        &self,
        instance: &WorkloadInstance,
        status: &WorkloadStatus,
        now_ms: u64,
    ) -> Result<u64, MeteringError> {
        let cached = self.cache.get(&instance.uid).await;
        let up_time_secs = (status.start_time > 0)
            .then(|| (now_ms.saturating_sub(status.start_time) as f64 / 1000.0).round() as u64);
        let labels = self
            .tenancy
            .resolve(&instance.namespace)
            .map(|project| InstanceLabels::new(instance, &project));

        let result = match &labels {
            Some(labels) => Ok(self.emit(labels, status, cached.as_ref(), up_time_secs, now_ms)),
            None => Err(MeteringError::UnknownProject(instance.namespace.clone())),
        };

        // Overwritten whatever happened above, or the next delta reads stale data.
        self.cache
            .put(
                &instance.uid,
                UsageSnapshot {
                    last_checked: now_ms,
                    up_time_secs,
                    running_status: status.running_status,
                    labels,
                },
            )
            .await;

        result
    }

    fn emit(
        &self,
        labels: &InstanceLabels,
        status: &WorkloadStatus,
        cached: Option<&UsageSnapshot>,
        up_time_secs: Option<u64>,
        now_ms: u64,
    ) -> u64 {
        let mut emitted = 0;
        self.sink.set_status(labels, status_gauge(status.running_status));

        if status.storage_dcu_per_min > 0 {
            if let Some(prev) = cached {
                let minutes = diff_minutes(
                    now_ms as f64 / 1000.0,
                    prev.last_checked as f64 / 1000.0,
                    self.interval_secs,
                );
                emitted += self.emit_usage(labels, minutes, status.storage_dcu_per_min);
            }
        }

        if let Some(up) = up_time_secs {
            self.sink.set_age(labels, up);
            if status.running_status == RunningStatus::Running {
                let previous_up = cached.and_then(|c| c.up_time_secs).filter(|u| *u > 0);
                if let Some(prev_up) = previous_up {
                    let minutes = diff_minutes(up as f64, prev_up as f64, self.interval_secs);
                    emitted += self.emit_usage(labels, minutes, status.compute_dcu_per_min);
                }
            }
        }

        let was_down = matches!(
            cached.map(|c| c.running_status),
            Some(RunningStatus::Paused) | Some(RunningStatus::Provisioning)
        );
        if was_down && status.running_status == RunningStatus::Running {
            debug!(instance = %labels.instance, "instance restarted");
            self.sink.inc_restart(labels);
        }

        emitted
    }

    fn emit_usage(&self, labels: &InstanceLabels, minutes: Option<f64>, rate: u64) -> u64 {
        let Some(minutes) = minutes else {
            return 0;
        };
        let increase = (minutes * rate as f64).round() as u64;
        if increase > 0 {
            self.sink.add_usage(labels, increase);
        }
        increase
    }

    /// Meter on `task`'s schedule until shutdown.
    pub async fn run(self: Arc<Self>, task: RecurrentTask, shutdown: watch::Receiver<bool>) {
        task.run(
            move || {
                let engine = Arc::clone(&self);
                async move { engine.tick().await.map(|_| ()) }
            },
            shutdown,
        )
        .await;
    }
}

//! Metrics sink and the in-process registry behind `/metrics`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use fleet_state::{Project, WorkloadInstance};

use crate::prometheus::render_prometheus;

/// Label set attached to every per-instance series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceLabels {
    pub project: String,
    /// `{kind}-{name}`, unique within a project.
    pub instance: String,
    pub kind: String,
    pub tenancy: String,
}

impl InstanceLabels {
    pub fn new(instance: &WorkloadInstance, project: &Project) -> Self {
        Self {
            project: project.slug.clone(),
            instance: format!("{}-{}", instance.kind, instance.name),
            kind: instance.kind.to_string(),
            tenancy: project.tenancy.clone(),
        }
    }
}

/// Instrumentation channels written by the metering engine and the
/// heartbeat recorder.
pub trait MetricsSink: Send + Sync {
    /// Status gauge, see `fleet_status::status_gauge`.
    fn set_status(&self, labels: &InstanceLabels, value: i64);
    /// Seconds since the instance was last started.
    fn set_age(&self, labels: &InstanceLabels, secs: u64);
    /// Monotonic DCU usage counter.
    fn add_usage(&self, labels: &InstanceLabels, dcu: u64);
    fn inc_restart(&self, labels: &InstanceLabels);
    /// Last heartbeat reported by the workload, epoch seconds (0 = unknown).
    fn set_last_activity(&self, labels: &InstanceLabels, epoch_secs: u64);
    /// Drop gauges for an instance that no longer exists. Counters are kept.
    fn forget(&self, labels: &InstanceLabels);
}

/// Point-in-time copy of every series, sorted by labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub status: Vec<(InstanceLabels, i64)>,
    pub age_secs: Vec<(InstanceLabels, u64)>,
    pub usage_dcu: Vec<(InstanceLabels, u64)>,
    pub restarts: Vec<(InstanceLabels, u64)>,
    pub last_activity: Vec<(InstanceLabels, u64)>,
}

#[derive(Debug, Default)]
struct Series {
    status: BTreeMap<InstanceLabels, i64>,
    age_secs: BTreeMap<InstanceLabels, u64>,
    usage_dcu: BTreeMap<InstanceLabels, u64>,
    restarts: BTreeMap<InstanceLabels, u64>,
    last_activity: BTreeMap<InstanceLabels, u64>,
}

/// In-process `MetricsSink`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    series: Mutex<Series>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Series> {
        // A panic while holding the lock leaves plain maps behind; keep serving them.
        self.series.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self, labels: &InstanceLabels) -> Option<i64> {
        self.lock().status.get(labels).copied()
    }

    pub fn age_secs(&self, labels: &InstanceLabels) -> Option<u64> {
        self.lock().age_secs.get(labels).copied()
    }

    /// Cumulative DCU emitted for an instance.
    pub fn usage_total(&self, labels: &InstanceLabels) -> u64 {
        self.lock().usage_dcu.get(labels).copied().unwrap_or(0)
    }

    pub fn restarts(&self, labels: &InstanceLabels) -> u64 {
        self.lock().restarts.get(labels).copied().unwrap_or(0)
    }

    pub fn last_activity(&self, labels: &InstanceLabels) -> Option<u64> {
        self.lock().last_activity.get(labels).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let series = self.lock();
        MetricsSnapshot {
            status: series.status.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            age_secs: series.age_secs.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            usage_dcu: series.usage_dcu.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            restarts: series.restarts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            last_activity: series
                .last_activity
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    pub fn render_prometheus(&self) -> String {
        render_prometheus(&self.snapshot())
    }
}

impl MetricsSink for MetricsRegistry {
    fn set_status(&self, labels: &InstanceLabels, value: i64) {
        self.lock().status.insert(labels.clone(), value);
    }

    fn set_age(&self, labels: &InstanceLabels, secs: u64) {
        self.lock().age_secs.insert(labels.clone(), secs);
    }

    fn add_usage(&self, labels: &InstanceLabels, dcu: u64) {
        *self.lock().usage_dcu.entry(labels.clone()).or_insert(0) += dcu;
    }

    fn inc_restart(&self, labels: &InstanceLabels) {
        *self.lock().restarts.entry(labels.clone()).or_insert(0) += 1;
    }

    fn set_last_activity(&self, labels: &InstanceLabels, epoch_secs: u64) {
        self.lock().last_activity.insert(labels.clone(), epoch_secs);
    }

    fn forget(&self, labels: &InstanceLabels) {
        let mut series = self.lock();
        series.status.remove(labels);
        series.age_secs.remove(labels);
        series.last_activity.remove(labels);
    }
}

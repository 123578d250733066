//! Idle detection for interactive workloads.
//!
//! Every tick, each running and enabled idle-capable instance gets a fresh
//! heartbeat, then its activity is judged:
//!
//! ```text
//!   last_seen == 0 ───────────────► Unknown ─┐
//!   now - last_updated >= freshness ► Active │  start_time == 0 ─► Active
//!   now - last_seen > threshold ────► Expired│  stale status ─────► Active
//!   otherwise ──────────────────────► Active └► now - start_time > threshold ─► Expired
//! ```
//!
//! An expired instance is soft-paused by flipping `spec.enabled` off; the
//! controller then scales it down on its next reconcile.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleet_controller::profile_for;
use fleet_core::{IdleConfig, RecurrentTask, epoch_millis};
use fleet_state::{RunningStatus, SpecPatch, StateStore, WorkloadStatus};

use crate::heartbeat::HeartbeatRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Expired,
    Unknown,
}

/// Judge activity from the recorded heartbeat alone.
pub fn heartbeat_activity(status: &WorkloadStatus, now_ms: u64, threshold_ms: u64, freshness_ms: u64) -> Activity {
    if status.last_seen == 0 {
        return Activity::Unknown;
    }
    if now_ms.saturating_sub(status.last_updated) >= freshness_ms {
        return Activity::Active;
    }
    if now_ms.saturating_sub(status.last_seen) > threshold_ms {
        return Activity::Expired;
    }
    Activity::Active
}

/// Heartbeat judgement with the start-time fallback for `Unknown`.
/// Never returns `Unknown`.
pub fn check_activity(status: &WorkloadStatus, now_ms: u64, threshold_ms: u64, freshness_ms: u64) -> Activity {
    match heartbeat_activity(status, now_ms, threshold_ms, freshness_ms) {
        Activity::Unknown => {
            if status.start_time == 0 {
                return Activity::Active;
            }
            if now_ms.saturating_sub(status.last_updated) >= freshness_ms {
                return Activity::Active;
            }
            if now_ms.saturating_sub(status.start_time) > threshold_ms {
                Activity::Expired
            } else {
                Activity::Active
            }
        }
        judged => judged,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleSummary {
    pub checked: usize,
    pub expired: usize,
    pub paused: usize,
    pub failed: usize,
}

pub struct IdleEvaluator {
    store: StateStore,
    recorder: HeartbeatRecorder,
    config: IdleConfig,
}

impl IdleEvaluator {
    pub fn new(store: StateStore, recorder: HeartbeatRecorder, config: IdleConfig) -> Self {
        Self {
            store,
            recorder,
            config,
        }
    }

    pub async fn tick(&self) -> anyhow::Result<IdleSummary> {
        self.tick_at(epoch_millis()).await
    }

    pub async fn tick_at(&self, now_ms: u64) -> anyhow::Result<IdleSummary> {
        let mut summary = IdleSummary::default();
        let candidates = self.store.list_instances()?.into_iter().filter(|i| {
            profile_for(i.kind).supports_idle()
                && i.spec.enabled
                && i.running_status() == Some(RunningStatus::Running)
        });

        for instance in candidates {
            summary.checked += 1;
            let refreshed = match self.recorder.record(&instance, now_ms).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!(
                        namespace = %instance.namespace,
                        name = %instance.name,
                        error = %e,
                        "heartbeat record failed"
                    );
                    summary.failed += 1;
                    continue;
                }
            };
            let Some(status) = refreshed.status.as_ref() else {
                continue;
            };

            let activity = check_activity(
                status,
                now_ms,
                self.config.threshold_ms(),
                self.config.freshness_ms(),
            );
            if activity != Activity::Expired {
                continue;
            }

            summary.expired += 1;
            info!(
                namespace = %instance.namespace,
                name = %instance.name,
                last_seen = status.last_seen,
                "instance idle"
            );
            if !self.config.pause_idle {
                continue;
            }
            let patch = SpecPatch {
                enabled: Some(false),
                ..SpecPatch::default()
            };
            match self.store.patch_spec(&refreshed.table_key(), &patch) {
                Ok(_) => {
                    info!(namespace = %instance.namespace, name = %instance.name, "idle instance paused");
                    summary.paused += 1;
                }
                Err(e) => {
                    warn!(namespace = %instance.namespace, name = %instance.name, error = %e, "pause failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    pub async fn run(self: Arc<Self>, task: RecurrentTask, shutdown: watch::Receiver<bool>) {
        task.run(
            move || {
                let evaluator = Arc::clone(&self);
                async move { evaluator.tick().await.map(|_| ()) }
            },
            shutdown,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::tests::{FakeProbe, workspace_spec};
    use fleet_metrics::MetricsRegistry;
    use fleet_state::{PrefixTenancy, StatusPatch, WorkloadKind};

    const NOW: u64 = 1_700_000_000_000;
    const THRESHOLD: u64 = 1_800_000;
    const FRESH: u64 = 20_000;
    const URL: &str = "http://dev.prj-acme.svc.cluster.local:3000/healthz";

    fn status(last_seen: u64, last_updated: u64, start_time: u64) -> WorkloadStatus {
        WorkloadStatus {
            running_status: RunningStatus::Running,
            last_seen,
            last_updated,
            start_time,
            ..WorkloadStatus::default()
        }
    }

    #[test]
    fn stale_heartbeat_with_fresh_status_is_expired() {
        let s = status(NOW - THRESHOLD - 1, NOW - 5_000, NOW - 10);
        assert_eq!(check_activity(&s, NOW, THRESHOLD, FRESH), Activity::Expired);
    }

    #[test]
    fn stale_status_is_active_regardless_of_heartbeat() {
        let s = status(NOW - THRESHOLD * 10, NOW - 25_000, NOW - THRESHOLD * 10);
        assert_eq!(check_activity(&s, NOW, THRESHOLD, FRESH), Activity::Active);
    }

    #[test]
    fn recent_heartbeat_is_active() {
        let s = status(NOW - 60_000, NOW - 1_000, NOW - THRESHOLD * 2);
        assert_eq!(check_activity(&s, NOW, THRESHOLD, FRESH), Activity::Active);
    }

    #[test]
    fn missing_heartbeat_falls_back_to_start_time() {
        let young = status(0, NOW - 1_000, NOW - 60_000);
        assert_eq!(heartbeat_activity(&young, NOW, THRESHOLD, FRESH), Activity::Unknown);
        assert_eq!(check_activity(&young, NOW, THRESHOLD, FRESH), Activity::Active);

        let old = status(0, NOW - 1_000, NOW - THRESHOLD - 1);
        assert_eq!(check_activity(&old, NOW, THRESHOLD, FRESH), Activity::Expired);

        let never_started = status(0, NOW - 1_000, 0);
        assert_eq!(check_activity(&never_started, NOW, THRESHOLD, FRESH), Activity::Active);
    }

    struct Harness {
        store: StateStore,
        probe: Arc<FakeProbe>,
        evaluator: IdleEvaluator,
    }

    fn harness(pause_idle: bool) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let probe = Arc::new(FakeProbe::default());
        let recorder = HeartbeatRecorder::new(
            store.clone(),
            probe.clone(),
            Arc::new(MetricsRegistry::new()),
            Arc::new(PrefixTenancy::default()),
        );
        let config = IdleConfig {
            pause_idle,
            ..IdleConfig::default()
        };
        Harness {
            evaluator: IdleEvaluator::new(store.clone(), recorder, config),
            store,
            probe,
        }
    }

    fn running(store: &StateStore, kind: WorkloadKind, name: &str, start_time: u64) {
        store
            .upsert_instance("prj-acme", name, kind, workspace_spec(true))
            .unwrap();
        store
            .patch_status(
                &format!("prj-acme/{name}"),
                &StatusPatch {
                    running_status: Some(RunningStatus::Running),
                    start_time: Some(start_time),
                    health_url: Some(URL.to_string()),
                    ..StatusPatch::default()
                },
            )
            .unwrap();
    }

    fn enabled(store: &StateStore, key: &str) -> bool {
        store.get_instance(key).unwrap().unwrap().spec.enabled
    }

    #[tokio::test]
    async fn unreachable_heartbeat_pauses_after_threshold() {
        let h = harness(true);
        // FakeProbe has no answer for URL: behaves like an HTTP 500.
        running(&h.store, WorkloadKind::Workspace, "dev", NOW - THRESHOLD - 1_000);

        let summary = h.evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.paused, 1);
        assert!(!enabled(&h.store, "prj-acme/dev"));
        let s = h.store.get_instance("prj-acme/dev").unwrap().unwrap().status.unwrap();
        assert_eq!(s.last_seen, 0);
        assert_eq!(s.last_updated, NOW);
    }

    #[tokio::test]
    async fn unreachable_heartbeat_keeps_young_instance() {
        let h = harness(true);
        running(&h.store, WorkloadKind::Workspace, "dev", NOW - 60_000);
        let summary = h.evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.expired, 0);
        assert!(enabled(&h.store, "prj-acme/dev"));
    }

    #[tokio::test]
    async fn active_heartbeat_keeps_old_instance() {
        let h = harness(true);
        h.probe.answer(URL, NOW - 30_000);
        running(&h.store, WorkloadKind::Workspace, "dev", NOW - THRESHOLD * 3);
        let summary = h.evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.expired, 0);
        assert!(enabled(&h.store, "prj-acme/dev"));
    }

    #[tokio::test]
    async fn pause_policy_off_only_reports() {
        let h = harness(false);
        h.probe.answer(URL, NOW - THRESHOLD - 1);
        running(&h.store, WorkloadKind::Workspace, "dev", NOW - THRESHOLD * 3);
        let summary = h.evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.paused, 0);
        assert!(enabled(&h.store, "prj-acme/dev"));
    }

    /// Deletes `victim` from the store the first time it is probed, the way
    /// an API delete can land between listing and writing.
    struct DeletingProbe {
        store: StateStore,
        victim: std::sync::Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl crate::heartbeat::HeartbeatProbe for DeletingProbe {
        async fn last_heartbeat(&self, _url: &str) -> Result<u64, crate::heartbeat::ProbeError> {
            if let Some(key) = self.victim.lock().unwrap().take() {
                self.store.delete_instance(&key).unwrap();
            }
            Err(crate::heartbeat::ProbeError::Status(503))
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_siblings() {
        let store = StateStore::open_in_memory().unwrap();
        let probe = Arc::new(DeletingProbe {
            store: store.clone(),
            victim: std::sync::Mutex::new(Some("prj-acme/a-dev".to_string())),
        });
        let recorder = HeartbeatRecorder::new(
            store.clone(),
            probe,
            Arc::new(MetricsRegistry::new()),
            Arc::new(PrefixTenancy::default()),
        );
        let evaluator = IdleEvaluator::new(store.clone(), recorder, IdleConfig::default());
        running(&store, WorkloadKind::Workspace, "a-dev", NOW - THRESHOLD * 3);
        running(&store, WorkloadKind::Workspace, "b-dev", NOW - THRESHOLD * 3);

        let summary = evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.paused, 1);
        assert!(store.get_instance("prj-acme/a-dev").unwrap().is_none());
        assert!(!enabled(&store, "prj-acme/b-dev"));
    }

    #[tokio::test]
    async fn only_running_idle_capable_instances_are_checked() {
        let h = harness(true);
        running(&h.store, WorkloadKind::Backend, "api", NOW - THRESHOLD * 3);
        running(&h.store, WorkloadKind::Workspace, "dev", NOW - THRESHOLD * 3);
        h.store
            .patch_status(
                "prj-acme/dev",
                &StatusPatch {
                    running_status: Some(RunningStatus::Provisioning),
                    ..StatusPatch::default()
                },
            )
            .unwrap();

        let summary = h.evaluator.tick_at(NOW).await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(*h.probe.calls.lock().unwrap(), 0);
        assert!(enabled(&h.store, "prj-acme/api"));
    }
}

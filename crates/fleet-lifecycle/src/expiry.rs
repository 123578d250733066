//! Expiry of dormant idle-capable instances.
//!
//! Instances that are neither running nor already expired, and not pinned,
//! are marked `expired` once they have been untouched (or up) for longer
//! than the expiry window. Expired instances stop accruing storage DCU.
//! With `delete_expired` set they are removed outright; the controller
//! then releases their storage from the deletion event.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleet_controller::profile_for;
use fleet_core::{ExpiryConfig, RecurrentTask, epoch_millis};
use fleet_state::{RunningStatus, StateStore, StatusPatch, WorkloadSpec, WorkloadStatus};

/// Whether a dormant instance has outlived `window_ms`.
pub fn check_expiry(spec: &WorkloadSpec, status: &WorkloadStatus, now_ms: u64, window_ms: u64) -> bool {
    if spec.pinned {
        return false;
    }
    if now_ms.saturating_sub(status.last_updated) > window_ms {
        return true;
    }
    status.start_time > 0 && now_ms.saturating_sub(status.start_time) > window_ms
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySummary {
    pub checked: usize,
    pub expired: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct ExpiryEvaluator {
    store: StateStore,
    config: ExpiryConfig,
}

impl ExpiryEvaluator {
    pub fn new(store: StateStore, config: ExpiryConfig) -> Self {
        Self { store, config }
    }

    pub async fn tick(&self) -> anyhow::Result<ExpirySummary> {
        self.tick_at(epoch_millis()).await
    }

    pub async fn tick_at(&self, now_ms: u64) -> anyhow::Result<ExpirySummary> {
        let mut summary = ExpirySummary::default();
        let window_ms = self.config.window_ms();

        for instance in self.store.list_instances()? {
            if !profile_for(instance.kind).supports_idle() {
                continue;
            }
            let Some(status) = instance.status.as_ref() else {
                continue;
            };
            if matches!(status.running_status, RunningStatus::Running | RunningStatus::Expired) {
                continue;
            }
            summary.checked += 1;
            if !check_expiry(&instance.spec, status, now_ms, window_ms) {
                continue;
            }

            let key = instance.table_key();
            let patch = StatusPatch {
                running_status: Some(RunningStatus::Expired),
                storage_dcu_per_min: Some(0),
                ..StatusPatch::default()
            };
            if let Err(e) = self.store.patch_status(&key, &patch) {
                warn!(namespace = %instance.namespace, name = %instance.name, error = %e, "expire failed");
                summary.failed += 1;
                continue;
            }
            summary.expired += 1;
            info!(
                namespace = %instance.namespace,
                name = %instance.name,
                from = %status.running_status,
                "instance expired"
            );

            if self.config.delete_expired {
                match self.store.delete_instance(&key) {
                    Ok(_) => {
                        info!(namespace = %instance.namespace, name = %instance.name, "expired instance deleted");
                        summary.deleted += 1;
                    }
                    Err(e) => {
                        warn!(namespace = %instance.namespace, name = %instance.name, error = %e, "delete failed");
                        summary.failed += 1;
                    }
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
    use crate::heartbeat::tests::workspace_spec;
    use fleet_state::{SpecPatch, WorkloadKind};

    const NOW: u64 = 1_700_000_000_000;
    const DAY: u64 = 24 * 60 * 60 * 1000;

    fn evaluator(store: &StateStore, delete_expired: bool) -> ExpiryEvaluator {
        ExpiryEvaluator::new(
            store.clone(),
            ExpiryConfig {
                delete_expired,
                ..ExpiryConfig::default()
            },
        )
    }

    fn dormant(store: &StateStore, kind: WorkloadKind, name: &str, status: RunningStatus, last_updated: u64) {
        store
            .upsert_instance("prj-acme", name, kind, workspace_spec(false))
            .unwrap();
        store
            .patch_status(
                &format!("prj-acme/{name}"),
                &StatusPatch {
                    running_status: Some(status),
                    last_updated: Some(last_updated),
                    storage_dcu_per_min: Some(80),
                    ..StatusPatch::default()
                },
            )
            .unwrap();
    }

    fn status_of(store: &StateStore, key: &str) -> WorkloadStatus {
        store.get_instance(key).unwrap().unwrap().status.unwrap()
    }

    #[test]
    fn pinned_never_expires() {
        let mut spec = workspace_spec(false);
        spec.pinned = true;
        let status = WorkloadStatus::default();
        assert!(!check_expiry(&spec, &status, NOW, 14 * DAY));
    }

    #[test]
    fn window_applies_to_last_update_and_start() {
        let spec = workspace_spec(false);
        let mut status = WorkloadStatus {
            last_updated: NOW - DAY,
            ..WorkloadStatus::default()
        };
        assert!(!check_expiry(&spec, &status, NOW, 14 * DAY));
        status.last_updated = NOW - 15 * DAY;
        assert!(check_expiry(&spec, &status, NOW, 14 * DAY));

        status.last_updated = NOW - DAY;
        status.start_time = NOW - 15 * DAY;
        assert!(check_expiry(&spec, &status, NOW, 14 * DAY));
    }

    #[test]
    fn zero_start_time_does_not_expire_on_its_own() {
        let spec = workspace_spec(false);
        let status = WorkloadStatus {
            last_updated: NOW - DAY,
            start_time: 0,
            ..WorkloadStatus::default()
        };
        assert!(!check_expiry(&spec, &status, NOW, 14 * DAY));
    }

    #[tokio::test]
    async fn dormant_workspace_expires_and_stops_storage_billing() {
        let store = StateStore::open_in_memory().unwrap();
        dormant(&store, WorkloadKind::Workspace, "dev", RunningStatus::Paused, NOW - 15 * DAY);

        let summary = evaluator(&store, false).tick_at(NOW).await.unwrap();
        assert_eq!(summary.expired, 1);
        let status = status_of(&store, "prj-acme/dev");
        assert_eq!(status.running_status, RunningStatus::Expired);
        assert_eq!(status.storage_dcu_per_min, 0);

        // Already expired: left alone.
        let summary = evaluator(&store, false).tick_at(NOW).await.unwrap();
        assert_eq!(summary.checked, 0);
    }

    #[tokio::test]
    async fn recent_or_pinned_or_running_are_kept() {
        let store = StateStore::open_in_memory().unwrap();
        dormant(&store, WorkloadKind::Workspace, "fresh", RunningStatus::Paused, NOW - DAY);
        dormant(&store, WorkloadKind::Workspace, "busy", RunningStatus::Running, NOW - 30 * DAY);
        dormant(&store, WorkloadKind::Workspace, "pin", RunningStatus::Paused, NOW - 30 * DAY);
        store
            .patch_spec(
                "prj-acme/pin",
                &SpecPatch {
                    pinned: Some(true),
                    ..SpecPatch::default()
                },
            )
            .unwrap();
        dormant(&store, WorkloadKind::Backend, "api", RunningStatus::Paused, NOW - 30 * DAY);

        let summary = evaluator(&store, false).tick_at(NOW).await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.expired, 0);
        assert_eq!(status_of(&store, "prj-acme/api").running_status, RunningStatus::Paused);
    }

    #[tokio::test]
    async fn delete_policy_removes_expired_instances() {
        let store = StateStore::open_in_memory().unwrap();
        dormant(&store, WorkloadKind::Workspace, "dev", RunningStatus::Error, NOW - 15 * DAY);

        let summary = evaluator(&store, true).tick_at(NOW).await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.deleted, 1);
        assert!(store.get_instance("prj-acme/dev").unwrap().is_none());
    }
}

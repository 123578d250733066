//! Status derivation rules.

use fleet_state::{RunningStatus, StorageClaimStatus};
use serde::{Deserialize, Serialize};

/// Phase of a single pod of the compute unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

/// How the compute unit rolls out replicas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RolloutStyle {
    /// Ordered set with stable identities (stateful kinds, workspaces).
    Set,
    /// Interchangeable replicas with rollout counters (stateless kinds).
    Deployment,
}

/// Health signals read from the compute unit and its pods.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedHealth {
    /// Replica count currently set on the compute unit.
    pub desired_replicas: u32,
    pub replicas: Option<u32>,
    pub ready_replicas: Option<u32>,
    pub available_replicas: Option<u32>,
    pub updated_replicas: Option<u32>,
    pub unavailable_replicas: Option<u32>,
    /// `None` when pod detail could not be read.
    pub pods: Option<Vec<PodPhase>>,
    /// Env var names of the main container.
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub storage: Vec<StorageClaimStatus>,
}

/// Derive the running status of an instance.
pub fn derive_status(
    observed: &ObservedHealth,
    previous: Option<RunningStatus>,
    style: RolloutStyle,
) -> RunningStatus {
    let desired = observed.desired_replicas;
    if desired == 0 {
        return RunningStatus::Paused;
    }

    if style == RolloutStyle::Deployment {
        let unavailable = observed.unavailable_replicas.unwrap_or(0);
        let settling = matches!(
            previous,
            None | Some(RunningStatus::Provisioning) | Some(RunningStatus::Syncing)
        );
        if unavailable >= desired && !settling {
            return RunningStatus::Error;
        }
        if observed.updated_replicas == Some(desired) && unavailable > 0 {
            return RunningStatus::Degraded;
        }
    }

    let pods = match observed.pods.as_deref() {
        Some(pods) if !pods.is_empty() => pods,
        _ => {
            let replicas = observed.replicas.unwrap_or(0);
            let ready = observed.ready_replicas.unwrap_or(0);
            return if replicas > 0 && ready > 0 {
                RunningStatus::Running
            } else {
                RunningStatus::Provisioning
            };
        }
    };

    let running = pods.iter().filter(|p| **p == PodPhase::Running).count();
    let available = observed.available_replicas.unwrap_or(0);

    if running == pods.len() && available == desired {
        return RunningStatus::Running;
    }
    if running > 0 && running < pods.len() {
        return RunningStatus::Degraded;
    }
    if previous == Some(RunningStatus::Syncing) && pods.contains(&PodPhase::Unknown) {
        return RunningStatus::Error;
    }
    if pods.contains(&PodPhase::Waiting) {
        return RunningStatus::Provisioning;
    }
    if pods.iter().all(|p| *p == PodPhase::Terminated) {
        return RunningStatus::Error;
    }
    RunningStatus::Provisioning
}

/// Numeric encoding of a status for the status gauge.
pub fn status_gauge(status: RunningStatus) -> i64 {
    match status {
        RunningStatus::Running => 2,
        RunningStatus::Provisioning | RunningStatus::Syncing | RunningStatus::Degraded => 1,
        RunningStatus::Paused | RunningStatus::Expired => 0,
        RunningStatus::Error => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PodPhase::*;
    use RunningStatus::*;

    fn observed(desired: u32) -> ObservedHealth {
        ObservedHealth {
            desired_replicas: desired,
            ..ObservedHealth::default()
        }
    }

    fn with_pods(desired: u32, available: u32, pods: &[PodPhase]) -> ObservedHealth {
        ObservedHealth {
            desired_replicas: desired,
            replicas: Some(desired),
            available_replicas: Some(available),
            pods: Some(pods.to_vec()),
            ..ObservedHealth::default()
        }
    }

    #[test]
    fn zero_replicas_is_paused_regardless_of_signals() {
        let mut o = with_pods(0, 0, &[Terminated]);
        o.unavailable_replicas = Some(3);
        for style in [RolloutStyle::Set, RolloutStyle::Deployment] {
            for prev in [None, Some(Running), Some(Error), Some(Syncing)] {
                assert_eq!(derive_status(&o, prev, style), Paused);
            }
        }
    }

    #[test]
    fn no_detail_after_syncing_is_provisioning() {
        let o = observed(1);
        assert_eq!(derive_status(&o, Some(Syncing), RolloutStyle::Set), Provisioning);
        assert_eq!(
            derive_status(&o, Some(Syncing), RolloutStyle::Deployment),
            Provisioning
        );
    }

    #[test]
    fn no_pod_data_uses_ready_count() {
        let o = ObservedHealth {
            desired_replicas: 1,
            replicas: Some(1),
            ready_replicas: Some(1),
            ..ObservedHealth::default()
        };
        assert_eq!(derive_status(&o, Some(Provisioning), RolloutStyle::Set), Running);

        let empty = ObservedHealth {
            pods: Some(Vec::new()),
            ..o.clone()
        };
        assert_eq!(derive_status(&empty, Some(Provisioning), RolloutStyle::Set), Running);
    }

    #[test]
    fn all_pods_running_and_available_is_running() {
        let o = with_pods(2, 2, &[PodPhase::Running, PodPhase::Running]);
        assert_eq!(derive_status(&o, Some(Provisioning), RolloutStyle::Set), Running);
    }

    #[test]
    fn partially_running_is_degraded() {
        let o = with_pods(2, 1, &[PodPhase::Running, Waiting]);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Degraded);
    }

    #[test]
    fn unknown_pod_after_syncing_is_error() {
        let o = with_pods(1, 0, &[Unknown]);
        assert_eq!(derive_status(&o, Some(Syncing), RolloutStyle::Set), Error);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Provisioning);
    }

    #[test]
    fn waiting_pod_is_provisioning() {
        let o = with_pods(1, 0, &[Waiting]);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Provisioning);
    }

    #[test]
    fn all_terminated_is_error() {
        let o = with_pods(2, 0, &[Terminated, Terminated]);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Error);
    }

    #[test]
    fn running_pods_with_short_availability_is_provisioning() {
        let o = with_pods(2, 1, &[PodPhase::Running, PodPhase::Running]);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Provisioning);
    }

    #[test]
    fn deployment_fully_unavailable_is_error_once_settled() {
        let mut o = with_pods(2, 0, &[Waiting, Waiting]);
        o.unavailable_replicas = Some(2);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Deployment), Error);
        // Still coming up: hysteresis keeps it out of error.
        assert_eq!(
            derive_status(&o, Some(Provisioning), RolloutStyle::Deployment),
            Provisioning
        );
        assert_eq!(derive_status(&o, None, RolloutStyle::Deployment), Provisioning);
        // Set-style kinds ignore rollout counters.
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Set), Provisioning);
    }

    #[test]
    fn deployment_rolled_out_with_unavailable_is_degraded() {
        let mut o = with_pods(3, 2, &[PodPhase::Running, PodPhase::Running, PodPhase::Running]);
        o.updated_replicas = Some(3);
        o.unavailable_replicas = Some(1);
        assert_eq!(derive_status(&o, Some(Running), RolloutStyle::Deployment), Degraded);
    }

    #[test]
    fn gauge_mapping() {
        assert_eq!(status_gauge(Running), 2);
        assert_eq!(status_gauge(Provisioning), 1);
        assert_eq!(status_gauge(Syncing), 1);
        assert_eq!(status_gauge(Degraded), 1);
        assert_eq!(status_gauge(Paused), 0);
        assert_eq!(status_gauge(Expired), 0);
        assert_eq!(status_gauge(Error), -1);
    }
}

//! Domain types for workload instances.
//!
//! A `WorkloadInstance` carries the user's desired `spec` and the
//! operator-owned observed `status`. All timestamps are epoch milliseconds.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Annotation carrying the blockchain network an instance is attached to.
pub const NETWORK_ANNOTATION: &str = "cardano.demeter.run/network";

/// Build the `{namespace}/{name}` table key.
pub fn instance_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Kind ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Stateless service.
    Backend,
    /// Stateful service with per-replica storage claims.
    BackendWithStorage,
    Frontend,
    DataWorker,
    /// Interactive development environment with a single persistent volume.
    Workspace,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 5] = [
        WorkloadKind::Backend,
        WorkloadKind::BackendWithStorage,
        WorkloadKind::Frontend,
        WorkloadKind::DataWorker,
        WorkloadKind::Workspace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Backend => "backend",
            WorkloadKind::BackendWithStorage => "backend_with_storage",
            WorkloadKind::Frontend => "frontend",
            WorkloadKind::DataWorker => "data_worker",
            WorkloadKind::Workspace => "workspace",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown workload kind: {s}"))
    }
}

// ── Status enum ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunningStatus {
    Paused,
    Provisioning,
    Syncing,
    Running,
    Degraded,
    Error,
    /// Terminal until the instance is re-enabled.
    Expired,
}

impl RunningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunningStatus::Paused => "paused",
            RunningStatus::Provisioning => "provisioning",
            RunningStatus::Syncing => "syncing",
            RunningStatus::Running => "running",
            RunningStatus::Degraded => "degraded",
            RunningStatus::Error => "error",
            RunningStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Spec ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSpec {
    /// Storage class name, e.g. `gp3` or `fast`.
    pub class: String,
    pub size_gb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Desired configuration, owned by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub enabled: bool,
    pub replicas: u32,
    pub compute_class: String,
    #[serde(default)]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Pinned workspaces are never expired.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Named config file contents, mounted into the main container.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl WorkloadSpec {
    pub fn network(&self) -> Option<&str> {
        self.annotations.get(NETWORK_ANNOTATION).map(String::as_str)
    }

    /// Replica count the compute unit should run with right now.
    pub fn effective_replicas(&self) -> u32 {
        if self.enabled { self.replicas } else { 0 }
    }
}

// ── Status ────────────────────────────────────────────────────────

/// A storage claim as observed on the infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageClaimStatus {
    pub name: String,
    pub size_gb: u64,
    pub class: String,
    pub in_use: bool,
}

/// Observed state, owned by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub running_status: RunningStatus,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub compute_dcu_per_min: u64,
    #[serde(default)]
    pub storage_dcu_per_min: u64,
    /// When the instance was last enabled; 0 while disabled.
    #[serde(default)]
    pub start_time: u64,
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub last_updated: u64,
    /// Last heartbeat reported by the workload; 0 when unknown.
    #[serde(default)]
    pub last_seen: u64,
    #[serde(default)]
    pub available_env_vars: Vec<String>,
    #[serde(default)]
    pub storage: Vec<StorageClaimStatus>,
    #[serde(default)]
    pub health_url: Option<String>,
}

impl Default for WorkloadStatus {
    fn default() -> Self {
        Self {
            running_status: RunningStatus::Provisioning,
            available_replicas: 0,
            compute_dcu_per_min: 0,
            storage_dcu_per_min: 0,
            start_time: 0,
            observed_generation: 0,
            last_updated: 0,
            last_seen: 0,
            available_env_vars: Vec::new(),
            storage: Vec::new(),
            health_url: None,
        }
    }
}

// ── Instance ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadInstance {
    pub namespace: String,
    pub name: String,
    /// Unique across re-creations of the same namespace/name.
    pub uid: String,
    pub kind: WorkloadKind,
    /// Bumped on every spec change.
    pub generation: u64,
    /// Bumped on every committed write.
    pub resource_version: u64,
    pub spec: WorkloadSpec,
    /// Absent until the controller first handles the instance.
    #[serde(default)]
    pub status: Option<WorkloadStatus>,
}

impl WorkloadInstance {
    pub fn table_key(&self) -> String {
        instance_key(&self.namespace, &self.name)
    }

    pub fn running_status(&self) -> Option<RunningStatus> {
        self.status.as_ref().map(|s| s.running_status)
    }
}

// ── Patches ───────────────────────────────────────────────────────

/// Field-level status update. Every `Some` field replaces the stored
/// field wholesale; `None` leaves it untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusPatch {
    pub running_status: Option<RunningStatus>,
    pub available_replicas: Option<u32>,
    pub compute_dcu_per_min: Option<u64>,
    pub storage_dcu_per_min: Option<u64>,
    pub start_time: Option<u64>,
    pub observed_generation: Option<u64>,
    pub last_updated: Option<u64>,
    pub last_seen: Option<u64>,
    pub available_env_vars: Option<Vec<String>>,
    pub storage: Option<Vec<StorageClaimStatus>>,
    pub health_url: Option<String>,
}

impl StatusPatch {
    pub fn is_empty(&self) -> bool {
        *self == StatusPatch::default()
    }

    pub fn apply(&self, status: &mut WorkloadStatus) {
        if let Some(v) = self.running_status {
            status.running_status = v;
        }
        if let Some(v) = self.available_replicas {
            status.available_replicas = v;
        }
        if let Some(v) = self.compute_dcu_per_min {
            status.compute_dcu_per_min = v;
        }
        if let Some(v) = self.storage_dcu_per_min {
            status.storage_dcu_per_min = v;
        }
        if let Some(v) = self.start_time {
            status.start_time = v;
        }
        if let Some(v) = self.observed_generation {
            status.observed_generation = v;
        }
        if let Some(v) = self.last_updated {
            status.last_updated = v;
        }
        if let Some(v) = self.last_seen {
            status.last_seen = v;
        }
        if let Some(v) = &self.available_env_vars {
            status.available_env_vars = v.clone();
        }
        if let Some(v) = &self.storage {
            status.storage = v.clone();
        }
        if let Some(v) = &self.health_url {
            status.health_url = Some(v.clone());
        }
    }
}

/// User-facing spec toggles the operator itself may flip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecPatch {
    pub enabled: Option<bool>,
    pub replicas: Option<u32>,
    pub pinned: Option<bool>,
}

impl SpecPatch {
    /// Apply to `spec`, returning whether anything changed.
    pub fn apply(&self, spec: &mut WorkloadSpec) -> bool {
        let before = spec.clone();
        if let Some(v) = self.enabled {
            spec.enabled = v;
        }
        if let Some(v) = self.replicas {
            spec.replicas = v;
        }
        if let Some(v) = self.pinned {
            spec.pinned = v;
        }
        *spec != before
    }
}

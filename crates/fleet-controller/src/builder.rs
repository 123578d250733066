//! Resource builder port.
//!
//! The builder owns the concrete infrastructure objects behind an
//! instance: the compute unit, its storage claims, a config object and a
//! network ingress. The controller only needs existence checks, targeted
//! patches of the compute unit, and observed health read back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_state::{EnvVar, WorkloadKind};
use fleet_status::{ObservedHealth, RolloutStyle};

use crate::error::InfraError;

/// Ties a child object to the instance that owns it, for cascade deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: WorkloadKind,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub ports: Vec<u16>,
    pub compute_class: String,
}

/// Where a volume's content comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    Claim(String),
    Config(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeUnit {
    pub name: String,
    pub replicas: u32,
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<VolumeSpec>,
    pub annotations: BTreeMap<String, String>,
    pub owner: OwnerReference,
    pub rollout: RolloutStyle,
}

/// Persistent storage requested by an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageClaim {
    /// Claim name, or the name prefix when `per_replica` is set.
    pub name: String,
    pub class: String,
    pub size_gb: u64,
    /// One claim per replica ordinal (`{name}-{i}`), retained on scale-down.
    pub per_replica: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigObject {
    pub name: String,
    pub files: BTreeMap<String, String>,
    pub owner: OwnerReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkIngress {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub owner: OwnerReference,
}

/// Everything an instance should own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildResourceSet {
    pub compute: ComputeUnit,
    pub storage: Option<StorageClaim>,
    pub config: Option<ConfigObject>,
    pub network: Option<NetworkIngress>,
}

/// Whole-field replace patch of a compute unit. Each `Some` field replaces
/// the current value outright, so removed containers and volumes disappear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputePatch {
    pub replicas: Option<u32>,
    pub containers: Option<Vec<ContainerSpec>>,
    pub volumes: Option<Vec<VolumeSpec>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ComputePatch {
    /// Patch carrying only the fields where `desired` differs from `current`.
    pub fn diff(current: &ComputeUnit, desired: &ComputeUnit) -> Self {
        Self {
            replicas: (current.replicas != desired.replicas).then_some(desired.replicas),
            containers: (current.containers != desired.containers)
                .then(|| desired.containers.clone()),
            volumes: (current.volumes != desired.volumes).then(|| desired.volumes.clone()),
            annotations: (current.annotations != desired.annotations)
                .then(|| desired.annotations.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ComputePatch::default()
    }

    pub fn apply(&self, unit: &mut ComputeUnit) {
        if let Some(r) = self.replicas {
            unit.replicas = r;
        }
        if let Some(c) = &self.containers {
            unit.containers = c.clone();
        }
        if let Some(v) = &self.volumes {
            unit.volumes = v.clone();
        }
        if let Some(a) = &self.annotations {
            unit.annotations = a.clone();
        }
    }
}

#[async_trait]
pub trait ResourceBuilder: Send + Sync {
    /// Current compute unit, `None` if it does not exist.
    async fn read_compute(&self, namespace: &str, name: &str) -> Result<Option<ComputeUnit>, InfraError>;

    async fn patch_compute(
        &self,
        namespace: &str,
        name: &str,
        patch: &ComputePatch,
    ) -> Result<(), InfraError>;

    /// Create the compute unit and its storage claims.
    async fn create_children(&self, namespace: &str, children: &ChildResourceSet) -> Result<(), InfraError>;

    /// Create or replace the config object.
    async fn ensure_config(&self, namespace: &str, config: &ConfigObject) -> Result<(), InfraError>;

    /// Create or replace the network ingress.
    async fn ensure_network(&self, namespace: &str, ingress: &NetworkIngress) -> Result<(), InfraError>;

    /// Remove the network ingress of `name`. Returns whether one existed.
    async fn remove_network(&self, namespace: &str, name: &str) -> Result<bool, InfraError>;

    /// Delete storage claims exclusively owned by `owner_name`. Returns how many.
    async fn release_storage(&self, namespace: &str, owner_name: &str) -> Result<usize, InfraError>;

    /// Read health signals of the compute unit, `None` if it does not exist.
    async fn observe(&self, namespace: &str, name: &str) -> Result<Option<ObservedHealth>, InfraError>;

    /// Remove remaining owner-referenced children after the owner is gone.
    /// Platforms that cascade-delete by owner reference need not override this.
    async fn collect_owned(&self, _namespace: &str, _owner: &OwnerReference) -> Result<(), InfraError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(replicas: u32, image: &str) -> ComputeUnit {
        ComputeUnit {
            name: "api".to_string(),
            replicas,
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                image: image.to_string(),
                env: Vec::new(),
                ports: vec![8080],
                compute_class: "small".to_string(),
            }],
            volumes: Vec::new(),
            annotations: BTreeMap::new(),
            owner: OwnerReference {
                kind: WorkloadKind::Backend,
                name: "api".to_string(),
                uid: "u1".to_string(),
            },
            rollout: RolloutStyle::Deployment,
        }
    }

    #[test]
    fn identical_units_diff_to_empty_patch() {
        let patch = ComputePatch::diff(&unit(2, "app:1"), &unit(2, "app:1"));
        assert!(patch.is_empty());
    }

    #[test]
    fn diff_carries_only_changed_fields() {
        let patch = ComputePatch::diff(&unit(2, "app:1"), &unit(0, "app:1"));
        assert_eq!(patch.replicas, Some(0));
        assert!(patch.containers.is_none());
        assert!(patch.volumes.is_none());
    }

    #[test]
    fn apply_replaces_whole_lists() {
        let mut current = unit(1, "app:1");
        current.volumes.push(VolumeSpec {
            name: "config".to_string(),
            mount_path: "/etc/app".to_string(),
            source: VolumeSource::Config("api-config".to_string()),
        });
        let desired = unit(1, "app:2");
        let patch = ComputePatch::diff(&current, &desired);
        patch.apply(&mut current);
        assert_eq!(current, desired);
        assert!(current.volumes.is_empty());
    }
}

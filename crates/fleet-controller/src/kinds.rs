//! Per-kind behaviour behind one capability interface.
//!
//! ```text
//!                 storage  idle  rollout     ingress
//! Backend           -       -    deployment  -
//! BackendWithStorage yes    -    set         -
//! Frontend          -       -    deployment  always
//! DataWorker        -       -    deployment  -
//! Workspace         yes    yes   set         while enabled
//! ```

use fleet_state::{EnvVar, RunningStatus, WorkloadInstance, WorkloadKind};
use fleet_status::{ObservedHealth, RolloutStyle, derive_status};

use crate::builder::{
    ChildResourceSet, ComputeUnit, ConfigObject, ContainerSpec, NetworkIngress, OwnerReference,
    StorageClaim, VolumeSource, VolumeSpec,
};

/// Statuses in which a disabled service-like instance still needs a
/// `syncing` transition.
const SERVICE_ACTIVE: &[RunningStatus] = &[
    RunningStatus::Running,
    RunningStatus::Provisioning,
    RunningStatus::Syncing,
    RunningStatus::Degraded,
];

const WORKSPACE_ACTIVE: &[RunningStatus] = &[
    RunningStatus::Running,
    RunningStatus::Provisioning,
    RunningStatus::Syncing,
    RunningStatus::Error,
];

/// Port workspaces serve their heartbeat on.
pub const WORKSPACE_HEALTH_PORT: u16 = 3000;

pub trait KindProfile: Send + Sync {
    fn kind(&self) -> WorkloadKind;

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet;

    fn rollout_style(&self) -> RolloutStyle;

    fn supports_storage(&self) -> bool {
        false
    }

    fn supports_idle(&self) -> bool {
        false
    }

    fn active_statuses(&self) -> &'static [RunningStatus] {
        SERVICE_ACTIVE
    }

    fn health_url(&self, _instance: &WorkloadInstance) -> Option<String> {
        None
    }

    fn derive_status(
        &self,
        observed: &ObservedHealth,
        previous: Option<RunningStatus>,
    ) -> RunningStatus {
        derive_status(observed, previous, self.rollout_style())
    }
}

pub struct BackendProfile;
pub struct BackendWithStorageProfile;
pub struct FrontendProfile;
pub struct DataWorkerProfile;
pub struct WorkspaceProfile;

static BACKEND: BackendProfile = BackendProfile;
static BACKEND_WITH_STORAGE: BackendWithStorageProfile = BackendWithStorageProfile;
static FRONTEND: FrontendProfile = FrontendProfile;
static DATA_WORKER: DataWorkerProfile = DataWorkerProfile;
static WORKSPACE: WorkspaceProfile = WorkspaceProfile;

pub fn profile_for(kind: WorkloadKind) -> &'static dyn KindProfile {
    match kind {
        WorkloadKind::Backend => &BACKEND,
        WorkloadKind::BackendWithStorage => &BACKEND_WITH_STORAGE,
        WorkloadKind::Frontend => &FRONTEND,
        WorkloadKind::DataWorker => &DATA_WORKER,
        WorkloadKind::Workspace => &WORKSPACE,
    }
}

// ── Shared child construction ─────────────────────────────────────

fn owner_of(instance: &WorkloadInstance) -> OwnerReference {
    OwnerReference {
        kind: instance.kind,
        name: instance.name.clone(),
        uid: instance.uid.clone(),
    }
}

fn main_container(instance: &WorkloadInstance, ports: Vec<u16>) -> ContainerSpec {
    let mut env = instance.spec.env.clone();
    if let Some(network) = instance.spec.network() {
        env.push(EnvVar {
            name: "NETWORK".to_string(),
            value: network.to_string(),
        });
    }
    ContainerSpec {
        name: "main".to_string(),
        image: instance.spec.image.clone(),
        env,
        ports,
        compute_class: instance.spec.compute_class.clone(),
    }
}

fn config_object(instance: &WorkloadInstance) -> Option<ConfigObject> {
    if instance.spec.config.is_empty() {
        return None;
    }
    Some(ConfigObject {
        name: format!("{}-config", instance.name),
        files: instance.spec.config.clone(),
        owner: owner_of(instance),
    })
}

fn storage_claim(instance: &WorkloadInstance, per_replica: bool) -> Option<StorageClaim> {
    instance.spec.storage.as_ref().map(|s| StorageClaim {
        name: format!("{}-data", instance.name),
        class: s.class.clone(),
        size_gb: s.size_gb,
        per_replica,
    })
}

fn ingress(instance: &WorkloadInstance, port: u16) -> NetworkIngress {
    NetworkIngress {
        name: instance.name.clone(),
        host: format!("{}.{}.svc.cluster.local", instance.name, instance.namespace),
        port,
        owner: owner_of(instance),
    }
}

/// Assemble the child set; volumes follow from the config and storage objects.
fn assemble(
    instance: &WorkloadInstance,
    replicas: u32,
    rollout: RolloutStyle,
    container: ContainerSpec,
    storage: Option<StorageClaim>,
    storage_mount: &str,
    network: Option<NetworkIngress>,
) -> ChildResourceSet {
    let config = config_object(instance);
    let mut volumes = Vec::new();
    if let Some(c) = &config {
        volumes.push(VolumeSpec {
            name: "config".to_string(),
            mount_path: "/etc/config".to_string(),
            source: VolumeSource::Config(c.name.clone()),
        });
    }
    if let Some(s) = &storage {
        volumes.push(VolumeSpec {
            name: "data".to_string(),
            mount_path: storage_mount.to_string(),
            source: VolumeSource::Claim(s.name.clone()),
        });
    }

    ChildResourceSet {
        compute: ComputeUnit {
            name: instance.name.clone(),
            replicas,
            containers: vec![container],
            volumes,
            annotations: instance.spec.annotations.clone(),
            owner: owner_of(instance),
            rollout,
        },
        storage,
        config,
        network,
    }
}

// ── Profiles ──────────────────────────────────────────────────────

impl KindProfile for BackendProfile {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Backend
    }

    fn rollout_style(&self) -> RolloutStyle {
        RolloutStyle::Deployment
    }

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet {
        assemble(
            instance,
            instance.spec.effective_replicas(),
            self.rollout_style(),
            main_container(instance, vec![8080]),
            None,
            "",
            None,
        )
    }
}

impl KindProfile for BackendWithStorageProfile {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::BackendWithStorage
    }

    fn rollout_style(&self) -> RolloutStyle {
        RolloutStyle::Set
    }

    fn supports_storage(&self) -> bool {
        true
    }

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet {
        assemble(
            instance,
            instance.spec.effective_replicas(),
            self.rollout_style(),
            main_container(instance, vec![8080]),
            storage_claim(instance, true),
            "/var/data",
            None,
        )
    }
}

impl KindProfile for FrontendProfile {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Frontend
    }

    fn rollout_style(&self) -> RolloutStyle {
        RolloutStyle::Deployment
    }

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet {
        assemble(
            instance,
            instance.spec.effective_replicas(),
            self.rollout_style(),
            main_container(instance, vec![80]),
            None,
            "",
            Some(ingress(instance, 80)),
        )
    }
}

impl KindProfile for DataWorkerProfile {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::DataWorker
    }

    fn rollout_style(&self) -> RolloutStyle {
        RolloutStyle::Deployment
    }

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet {
        assemble(
            instance,
            instance.spec.effective_replicas(),
            self.rollout_style(),
            main_container(instance, Vec::new()),
            None,
            "",
            None,
        )
    }
}

impl KindProfile for WorkspaceProfile {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Workspace
    }

    fn rollout_style(&self) -> RolloutStyle {
        RolloutStyle::Set
    }

    fn supports_storage(&self) -> bool {
        true
    }

    fn supports_idle(&self) -> bool {
        true
    }

    fn active_statuses(&self) -> &'static [RunningStatus] {
        WORKSPACE_ACTIVE
    }

    fn health_url(&self, instance: &WorkloadInstance) -> Option<String> {
        Some(format!(
            "http://{}.{}.svc.cluster.local:{WORKSPACE_HEALTH_PORT}/healthz",
            instance.name, instance.namespace
        ))
    }

    fn compute_desired_children(&self, instance: &WorkloadInstance) -> ChildResourceSet {
        // A workspace is a single interactive replica.
        let replicas = instance.spec.effective_replicas().min(1);
        let network = instance
            .spec
            .enabled
            .then(|| ingress(instance, WORKSPACE_HEALTH_PORT));
        assemble(
            instance,
            replicas,
            self.rollout_style(),
            main_container(instance, vec![WORKSPACE_HEALTH_PORT]),
            storage_claim(instance, false),
            "/home/user",
            network,
        )
    }
}

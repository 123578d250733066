//! In-process `ResourceBuilder` used by the standalone daemon and tests.
//!
//! Simulates compute units with replica readiness, storage claims,
//! config objects and ingresses. With `auto_settle` every replica turns
//! ready as soon as it is requested; without it, replicas stay `Waiting`
//! until a test calls [`InMemoryBuilder::settle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use fleet_state::{StorageClaimStatus, instance_key};
use fleet_status::{ObservedHealth, PodPhase};

use crate::builder::{
    ChildResourceSet, ComputePatch, ComputeUnit, ConfigObject, NetworkIngress, OwnerReference,
    ResourceBuilder, StorageClaim,
};
use crate::error::InfraError;

/// Operations a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ReadCompute,
    PatchCompute,
    Config,
    Network,
    Observe,
}

#[derive(Debug, Clone)]
struct SimulatedUnit {
    unit: ComputeUnit,
    pods: Vec<PodPhase>,
}

impl SimulatedUnit {
    fn ready(&self) -> u32 {
        self.pods.iter().filter(|p| **p == PodPhase::Running).count() as u32
    }

    /// Grow or shrink the pod list to the unit's replica count.
    fn resize(&mut self, settle: bool) {
        let target = self.unit.replicas as usize;
        self.pods.truncate(target);
        let fill = if settle { PodPhase::Running } else { PodPhase::Waiting };
        while self.pods.len() < target {
            self.pods.push(fill);
        }
        if settle {
            self.pods.iter_mut().for_each(|p| *p = PodPhase::Running);
        }
    }
}

#[derive(Debug, Clone)]
struct ClaimRecord {
    name: String,
    owner: String,
    class: String,
    size_gb: u64,
    ordinal: Option<u32>,
}

#[derive(Debug, Default)]
struct Infra {
    units: HashMap<String, SimulatedUnit>,
    /// Claims per namespace.
    claims: HashMap<String, Vec<ClaimRecord>>,
    configs: HashMap<String, ConfigObject>,
    networks: HashMap<String, NetworkIngress>,
}

pub struct InMemoryBuilder {
    infra: RwLock<Infra>,
    auto_settle: bool,
    fail_points: RwLock<HashMap<FailPoint, bool>>,
    hide_pods: AtomicBool,
}

impl InMemoryBuilder {
    pub fn new(auto_settle: bool) -> Self {
        Self {
            infra: RwLock::new(Infra::default()),
            auto_settle,
            fail_points: RwLock::new(HashMap::new()),
            hide_pods: AtomicBool::new(false),
        }
    }

    pub async fn set_failing(&self, point: FailPoint, failing: bool) {
        self.fail_points.write().await.insert(point, failing);
    }

    /// Report health without per-pod detail.
    pub fn set_hide_pods(&self, hide: bool) {
        self.hide_pods.store(hide, Ordering::Relaxed);
    }

    async fn check(&self, point: FailPoint) -> Result<(), InfraError> {
        if self.fail_points.read().await.get(&point).copied().unwrap_or(false) {
            return Err(InfraError::Unavailable(format!("{point:?} failed")));
        }
        Ok(())
    }

    /// Mark every replica of a unit ready.
    pub async fn settle(&self, namespace: &str, name: &str) -> bool {
        let mut infra = self.infra.write().await;
        match infra.units.get_mut(&instance_key(namespace, name)) {
            Some(sim) => {
                sim.resize(true);
                true
            }
            None => false,
        }
    }

    /// Overwrite the pod phases of a unit.
    pub async fn set_pods(&self, namespace: &str, name: &str, pods: Vec<PodPhase>) -> bool {
        let mut infra = self.infra.write().await;
        match infra.units.get_mut(&instance_key(namespace, name)) {
            Some(sim) => {
                sim.pods = pods;
                true
            }
            None => false,
        }
    }

    pub async fn claim_names(&self, namespace: &str) -> Vec<String> {
        let infra = self.infra.read().await;
        infra
            .claims
            .get(namespace)
            .map(|c| c.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn has_network(&self, namespace: &str, name: &str) -> bool {
        self.infra
            .read()
            .await
            .networks
            .contains_key(&instance_key(namespace, name))
    }

    pub async fn config(&self, namespace: &str, name: &str) -> Option<ConfigObject> {
        self.infra
            .read()
            .await
            .configs
            .get(&instance_key(namespace, name))
            .cloned()
    }

    fn ensure_claims(infra: &mut Infra, namespace: &str, owner: &str, claim: &StorageClaim, replicas: u32) {
        let claims = infra.claims.entry(namespace.to_string()).or_default();
        let wanted: Vec<(String, Option<u32>)> = if claim.per_replica {
            (0..replicas)
                .map(|i| (format!("{}-{i}", claim.name), Some(i)))
                .collect()
        } else {
            vec![(claim.name.clone(), None)]
        };
        for (name, ordinal) in wanted {
            if claims.iter().any(|c| c.name == name) {
                continue;
            }
            claims.push(ClaimRecord {
                name,
                owner: owner.to_string(),
                class: claim.class.clone(),
                size_gb: claim.size_gb,
                ordinal,
            });
        }
    }
}

impl Default for InMemoryBuilder {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ResourceBuilder for InMemoryBuilder {
    async fn read_compute(&self, namespace: &str, name: &str) -> Result<Option<ComputeUnit>, InfraError> {
        self.check(FailPoint::ReadCompute).await?;
        let infra = self.infra.read().await;
        Ok(infra
            .units
            .get(&instance_key(namespace, name))
            .map(|sim| sim.unit.clone()))
    }

    async fn patch_compute(
        &self,
        namespace: &str,
        name: &str,
        patch: &ComputePatch,
    ) -> Result<(), InfraError> {
        self.check(FailPoint::PatchCompute).await?;
        let mut infra = self.infra.write().await;
        let sim = infra
            .units
            .get_mut(&instance_key(namespace, name))
            .ok_or_else(|| InfraError::NotFound {
                resource: "compute unit",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        patch.apply(&mut sim.unit);
        sim.resize(self.auto_settle);
        debug!(%namespace, %name, replicas = sim.unit.replicas, "compute unit patched");

        // New ordinals of a per-replica set get their claims on scale-up.
        let replicas = sim.unit.replicas;
        let template = infra
            .claims
            .get(namespace)
            .and_then(|claims| claims.iter().find(|c| c.owner == name && c.ordinal.is_some()))
            .map(|c| StorageClaim {
                name: c.name.rsplit_once('-').map(|(p, _)| p.to_string()).unwrap_or_default(),
                class: c.class.clone(),
                size_gb: c.size_gb,
                per_replica: true,
            });
        if let Some(claim) = template {
            Self::ensure_claims(&mut infra, namespace, name, &claim, replicas);
        }
        Ok(())
    }

    async fn create_children(&self, namespace: &str, children: &ChildResourceSet) -> Result<(), InfraError> {
        let name = children.compute.name.clone();
        let key = instance_key(namespace, &name);
        let mut infra = self.infra.write().await;
        if infra.units.contains_key(&key) {
            return Err(InfraError::AlreadyExists {
                resource: "compute unit",
                namespace: namespace.to_string(),
                name,
            });
        }
        let mut sim = SimulatedUnit {
            unit: children.compute.clone(),
            pods: Vec::new(),
        };
        sim.resize(self.auto_settle);
        infra.units.insert(key, sim);
        if let Some(claim) = &children.storage {
            Self::ensure_claims(&mut infra, namespace, &name, claim, children.compute.replicas);
        }
        debug!(%namespace, %name, "children created");
        Ok(())
    }

    async fn ensure_config(&self, namespace: &str, config: &ConfigObject) -> Result<(), InfraError> {
        self.check(FailPoint::Config).await?;
        let mut infra = self.infra.write().await;
        infra
            .configs
            .insert(instance_key(namespace, &config.owner.name), config.clone());
        Ok(())
    }

    async fn ensure_network(&self, namespace: &str, ingress: &NetworkIngress) -> Result<(), InfraError> {
        self.check(FailPoint::Network).await?;
        let mut infra = self.infra.write().await;
        infra
            .networks
            .insert(instance_key(namespace, &ingress.name), ingress.clone());
        Ok(())
    }

    async fn remove_network(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.check(FailPoint::Network).await?;
        let mut infra = self.infra.write().await;
        Ok(infra.networks.remove(&instance_key(namespace, name)).is_some())
    }

    async fn release_storage(&self, namespace: &str, owner_name: &str) -> Result<usize, InfraError> {
        let mut infra = self.infra.write().await;
        let Some(claims) = infra.claims.get_mut(namespace) else {
            return Ok(0);
        };
        let before = claims.len();
        claims.retain(|c| c.owner != owner_name);
        Ok(before - claims.len())
    }

    async fn observe(&self, namespace: &str, name: &str) -> Result<Option<ObservedHealth>, InfraError> {
        self.check(FailPoint::Observe).await?;
        let infra = self.infra.read().await;
        let Some(sim) = infra.units.get(&instance_key(namespace, name)) else {
            return Ok(None);
        };

        let replicas = sim.unit.replicas;
        let ready = sim.ready();
        // A replica counts as rolled out once its pod has left `Waiting`.
        let updated = sim.pods.iter().filter(|p| **p != PodPhase::Waiting).count() as u32;
        let in_use_ordinals = replicas;
        let storage = infra
            .claims
            .get(namespace)
            .map(|claims| {
                claims
                    .iter()
                    .filter(|c| c.owner == name)
                    .map(|c| StorageClaimStatus {
                        name: c.name.clone(),
                        size_gb: c.size_gb,
                        class: c.class.clone(),
                        in_use: c.ordinal.map(|o| o < in_use_ordinals).unwrap_or(replicas > 0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let env_vars = sim
            .unit
            .containers
            .first()
            .map(|c| c.env.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default();

        let pods = (!self.hide_pods.load(Ordering::Relaxed)).then(|| sim.pods.clone());

        Ok(Some(ObservedHealth {
            desired_replicas: replicas,
            replicas: Some(replicas),
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            updated_replicas: Some(updated),
            unavailable_replicas: Some(replicas.saturating_sub(ready)),
            pods,
            env_vars,
            storage,
        }))
    }

    async fn collect_owned(&self, namespace: &str, owner: &OwnerReference) -> Result<(), InfraError> {
        let key = instance_key(namespace, &owner.name);
        let mut infra = self.infra.write().await;
        let owned = |o: &OwnerReference| o.uid == owner.uid;
        if infra.units.get(&key).is_some_and(|sim| owned(&sim.unit.owner)) {
            infra.units.remove(&key);
        }
        if infra.configs.get(&key).is_some_and(|c| owned(&c.owner)) {
            infra.configs.remove(&key);
        }
        if infra.networks.get(&key).is_some_and(|n| owned(&n.owner)) {
            infra.networks.remove(&key);
        }
        debug!(%namespace, name = %owner.name, "owned children collected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::profile_for;
    use std::collections::BTreeMap;
    use fleet_state::{StorageSpec, WorkloadInstance, WorkloadKind, WorkloadSpec};

    fn instance(kind: WorkloadKind, replicas: u32) -> WorkloadInstance {
        WorkloadInstance {
            namespace: "prj-acme".to_string(),
            name: "db".to_string(),
            uid: "u1".to_string(),
            kind,
            generation: 1,
            resource_version: 1,
            spec: WorkloadSpec {
                enabled: true,
                replicas,
                compute_class: "small".to_string(),
                storage: Some(StorageSpec {
                    class: "fast".to_string(),
                    size_gb: 5,
                }),
                annotations: BTreeMap::new(),
                pinned: false,
                image: "db:1".to_string(),
                env: Vec::new(),
                config: BTreeMap::new(),
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn unsettled_units_report_waiting_pods() {
        let b = InMemoryBuilder::new(false);
        let i = instance(WorkloadKind::BackendWithStorage, 2);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();

        let h = b.observe("prj-acme", "db").await.unwrap().unwrap();
        assert_eq!(h.desired_replicas, 2);
        assert_eq!(h.ready_replicas, Some(0));
        assert_eq!(h.pods, Some(vec![PodPhase::Waiting, PodPhase::Waiting]));

        assert!(b.settle("prj-acme", "db").await);
        let h = b.observe("prj-acme", "db").await.unwrap().unwrap();
        assert_eq!(h.available_replicas, Some(2));
    }

    #[tokio::test]
    async fn hidden_pods_leave_only_replica_counts() {
        let b = InMemoryBuilder::new(true);
        let i = instance(WorkloadKind::BackendWithStorage, 1);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();

        b.set_hide_pods(true);
        let h = b.observe("prj-acme", "db").await.unwrap().unwrap();
        assert_eq!(h.pods, None);
        assert_eq!(h.ready_replicas, Some(1));

        b.set_hide_pods(false);
        let h = b.observe("prj-acme", "db").await.unwrap().unwrap();
        assert_eq!(h.pods, Some(vec![PodPhase::Running]));
    }

    #[tokio::test]
    async fn per_replica_claims_follow_scale_up_and_survive_scale_down() {
        let b = InMemoryBuilder::new(true);
        let i = instance(WorkloadKind::BackendWithStorage, 2);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();
        assert_eq!(b.claim_names("prj-acme").await, vec!["db-data-0", "db-data-1"]);

        let up = ComputePatch {
            replicas: Some(3),
            ..ComputePatch::default()
        };
        b.patch_compute("prj-acme", "db", &up).await.unwrap();
        assert_eq!(b.claim_names("prj-acme").await.len(), 3);

        let down = ComputePatch {
            replicas: Some(1),
            ..ComputePatch::default()
        };
        b.patch_compute("prj-acme", "db", &down).await.unwrap();
        let h = b.observe("prj-acme", "db").await.unwrap().unwrap();
        assert_eq!(h.storage.len(), 3);
        assert_eq!(h.storage.iter().filter(|c| c.in_use).count(), 1);
    }

    #[tokio::test]
    async fn release_storage_only_touches_owner() {
        let b = InMemoryBuilder::new(true);
        let i = instance(WorkloadKind::Workspace, 1);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();
        assert_eq!(b.release_storage("prj-acme", "other").await.unwrap(), 0);
        assert_eq!(b.release_storage("prj-acme", "db").await.unwrap(), 1);
        assert!(b.claim_names("prj-acme").await.is_empty());
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let b = InMemoryBuilder::new(true);
        let i = instance(WorkloadKind::Backend, 1);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();
        let err = b.create_children("prj-acme", &children).await.unwrap_err();
        assert!(matches!(err, InfraError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn fail_points_surface_as_unavailable() {
        let b = InMemoryBuilder::new(true);
        b.set_failing(FailPoint::ReadCompute, true).await;
        assert!(matches!(
            b.read_compute("prj-acme", "db").await,
            Err(InfraError::Unavailable(_))
        ));
        b.set_failing(FailPoint::ReadCompute, false).await;
        assert!(b.read_compute("prj-acme", "db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collect_owned_removes_only_matching_uid() {
        let b = InMemoryBuilder::new(true);
        let i = instance(WorkloadKind::Backend, 1);
        let children = profile_for(i.kind).compute_desired_children(&i);
        b.create_children("prj-acme", &children).await.unwrap();

        let stranger = OwnerReference {
            kind: WorkloadKind::Backend,
            name: "db".to_string(),
            uid: "other".to_string(),
        };
        b.collect_owned("prj-acme", &stranger).await.unwrap();
        assert!(b.read_compute("prj-acme", "db").await.unwrap().is_some());

        b.collect_owned("prj-acme", &children.compute.owner).await.unwrap();
        assert!(b.read_compute("prj-acme", "db").await.unwrap().is_none());
    }
}

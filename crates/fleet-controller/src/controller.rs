//! Reconciliation controller, one per workload kind.
//!
//! Consumes `WorkloadEvent`s strictly in order and drives the instance's
//! children towards its spec through the `ResourceBuilder`.
//!
//! ```text
//! Added    ─► on_created  ─► init status ─► apply_desired_state
//! Modified ─► on_modified ─► syncing?    ─► apply_desired_state ─► observed_generation
//! Deleted  ─► on_deleted  ─► release storage ─► collect owned children
//! Observed ─► on_observed ─► derive status ─► DCU rates ─► status patch
//! ```
//!
//! Failures are logged and dropped. Nothing is retried inline; the
//! watcher's periodic resync delivers the instance again.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_core::{RateCard, epoch_millis};
use fleet_state::{
    RunningStatus, StateStore, StatusPatch, StorageClaimStatus, TenancyResolver, WorkloadInstance,
    WorkloadKind,
};

use crate::builder::{ComputePatch, ResourceBuilder};
use crate::error::{ControllerError, ControllerResult};
use crate::event::{EventReceiver, WorkloadEvent};
use crate::kinds::{KindProfile, profile_for};

/// What `apply_desired_state` did to the compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Patched,
    Unchanged,
}

pub struct Controller {
    profile: &'static dyn KindProfile,
    store: StateStore,
    builder: Arc<dyn ResourceBuilder>,
    tenancy: Arc<dyn TenancyResolver>,
    rates: RateCard,
}

impl Controller {
    pub fn new(
        kind: WorkloadKind,
        store: StateStore,
        builder: Arc<dyn ResourceBuilder>,
        tenancy: Arc<dyn TenancyResolver>,
        rates: RateCard,
    ) -> Self {
        Self {
            profile: profile_for(kind),
            store,
            builder,
            tenancy,
            rates,
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        self.profile.kind()
    }

    /// Process events until the queue closes or shutdown is signalled.
    /// An event already being handled always runs to completion.
    pub async fn run(&self, mut events: EventReceiver, mut shutdown: watch::Receiver<bool>) {
        info!(kind = %self.kind(), "controller started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }
        info!(kind = %self.kind(), "controller stopped");
    }

    async fn dispatch(&self, event: WorkloadEvent) {
        let label = event.label();
        if let Err(e) = self.handle(event).await {
            error!(kind = %self.kind(), event = label, error = %e, "event handling failed");
        }
    }

    pub async fn handle(&self, event: WorkloadEvent) -> ControllerResult<()> {
        match event {
            WorkloadEvent::Added(instance) => self.on_created(&instance).await,
            WorkloadEvent::Modified(instance) => self.on_modified(&instance).await,
            WorkloadEvent::Deleted(instance) => self.on_deleted(&instance).await,
            WorkloadEvent::Observed(key) => self.on_observed(&key).await,
        }
    }

    fn check_tenancy(&self, instance: &WorkloadInstance) -> ControllerResult<()> {
        match self.tenancy.resolve(&instance.namespace) {
            Some(_) => Ok(()),
            None => Err(ControllerError::DataIntegrity(format!(
                "invalid project for {}/{}",
                instance.namespace, instance.name
            ))),
        }
    }

    /// Latest stored copy; events may carry a stale one.
    fn current(&self, instance: &WorkloadInstance) -> ControllerResult<Option<WorkloadInstance>> {
        let stored = self.store.get_instance(&instance.table_key())?;
        Ok(stored.filter(|s| s.uid == instance.uid))
    }

    pub async fn on_created(&self, instance: &WorkloadInstance) -> ControllerResult<()> {
        self.check_tenancy(instance)?;
        let Some(mut instance) = self.current(instance)? else {
            debug!(namespace = %instance.namespace, name = %instance.name, "instance gone before creation");
            return Ok(());
        };

        if instance.status.is_none() {
            let now = epoch_millis();
            let patch = StatusPatch {
                running_status: Some(RunningStatus::Provisioning),
                observed_generation: Some(instance.generation),
                start_time: Some(if instance.spec.enabled { now } else { 0 }),
                last_updated: Some(now),
                health_url: self.profile.health_url(&instance),
                ..StatusPatch::default()
            };
            instance = self.store.patch_status(&instance.table_key(), &patch)?;
            info!(
                kind = %self.kind(),
                namespace = %instance.namespace,
                name = %instance.name,
                "instance initialised"
            );
        }

        self.apply_desired_state(&instance).await?;
        Ok(())
    }

    pub async fn on_modified(&self, instance: &WorkloadInstance) -> ControllerResult<()> {
        self.check_tenancy(instance)?;
        let Some(mut instance) = self.current(instance)? else {
            return Ok(());
        };
        if instance.status.is_none() {
            return self.on_created(&instance).await;
        }
        let key = instance.table_key();
        let now = epoch_millis();

        if let Some(status) = &instance.status {
            let enabled = instance.spec.enabled;
            let current = status.running_status;
            // `start_time` is non-zero exactly while the instance is enabled.
            // Status alone is not enough: expiry also lands on enabled instances.
            let started = status.start_time > 0;
            let disabling =
                !enabled && started && self.profile.active_statuses().contains(&current);
            let enabling = enabled
                && !started
                && matches!(current, RunningStatus::Paused | RunningStatus::Expired);
            if disabling || enabling {
                info!(
                    kind = %self.kind(),
                    namespace = %instance.namespace,
                    name = %instance.name,
                    enabled,
                    from = %current,
                    "enable state changed, syncing"
                );
                let patch = StatusPatch {
                    running_status: Some(RunningStatus::Syncing),
                    start_time: Some(if enabled { now } else { 0 }),
                    last_updated: Some(now),
                    ..StatusPatch::default()
                };
                instance = self.store.patch_status(&key, &patch)?;
            }
        }

        self.apply_desired_state(&instance).await?;

        let observed = instance.status.as_ref().map(|s| s.observed_generation);
        if observed != Some(instance.generation) {
            let patch = StatusPatch {
                observed_generation: Some(instance.generation),
                last_updated: Some(now),
                ..StatusPatch::default()
            };
            self.store.patch_status(&key, &patch)?;
        }
        Ok(())
    }

    pub async fn on_deleted(&self, instance: &WorkloadInstance) -> ControllerResult<()> {
        if self.profile.supports_storage() {
            let released = self
                .builder
                .release_storage(&instance.namespace, &instance.name)
                .await?;
            info!(
                kind = %self.kind(),
                namespace = %instance.namespace,
                name = %instance.name,
                released,
                "storage claims released"
            );
        }

        let children = self.profile.compute_desired_children(instance);
        self.builder
            .collect_owned(&instance.namespace, &children.compute.owner)
            .await?;
        Ok(())
    }

    pub async fn on_observed(&self, key: &str) -> ControllerResult<()> {
        let Some(instance) = self.store.get_instance(key)? else {
            return Ok(());
        };
        let Some(observed) = self.builder.observe(&instance.namespace, &instance.name).await? else {
            return Ok(());
        };

        let previous = instance.running_status();
        let mut running_status = self.profile.derive_status(&observed, previous);
        // An expired instance stays expired while it remains scaled down.
        let held_expired =
            previous == Some(RunningStatus::Expired) && running_status == RunningStatus::Paused;
        if held_expired {
            running_status = RunningStatus::Expired;
        }

        let available = observed.available_replicas.unwrap_or(0);
        let compute_dcu_per_min = match running_status {
            RunningStatus::Running | RunningStatus::Degraded => {
                let replicas = if available > 0 { available } else { observed.desired_replicas };
                self.rates
                    .compute_dcu_per_min(&instance.spec.compute_class, replicas)
            }
            _ => 0,
        };
        let storage_dcu_per_min = if self.profile.supports_storage() && !held_expired {
            self.storage_rate(&observed.storage)
        } else {
            0
        };

        if previous != Some(running_status) {
            info!(
                kind = %self.kind(),
                namespace = %instance.namespace,
                name = %instance.name,
                from = ?previous,
                to = %running_status,
                "status changed"
            );
        }

        let patch = StatusPatch {
            running_status: Some(running_status),
            available_replicas: Some(available),
            compute_dcu_per_min: Some(compute_dcu_per_min),
            storage_dcu_per_min: Some(storage_dcu_per_min),
            available_env_vars: Some(observed.env_vars.clone()),
            storage: Some(observed.storage.clone()),
            last_updated: Some(epoch_millis()),
            ..StatusPatch::default()
        };
        self.store.patch_status(key, &patch)?;
        Ok(())
    }

    /// Rate of the first claim's class × size × number of claims.
    fn storage_rate(&self, claims: &[StorageClaimStatus]) -> u64 {
        let Some(first) = claims.first() else {
            return 0;
        };
        self.rates
            .storage_dcu_per_min(&first.class, first.size_gb, claims.len() as u32)
    }

    pub async fn apply_desired_state(&self, instance: &WorkloadInstance) -> ControllerResult<ApplyOutcome> {
        let ns = instance.namespace.as_str();
        let name = instance.name.as_str();
        let children = self.profile.compute_desired_children(instance);

        let current = match self.builder.read_compute(ns, name).await {
            Ok(current) => current,
            Err(e) => {
                warn!(namespace = %ns, %name, error = %e, "compute read failed, creating");
                None
            }
        };

        let outcome = match current {
            Some(current) => {
                let patch = ComputePatch::diff(&current, &children.compute);
                if patch.is_empty() {
                    ApplyOutcome::Unchanged
                } else {
                    self.builder.patch_compute(ns, name, &patch).await?;
                    ApplyOutcome::Patched
                }
            }
            None => {
                self.builder.create_children(ns, &children).await?;
                ApplyOutcome::Created
            }
        };
        debug!(kind = %self.kind(), namespace = %ns, %name, ?outcome, "desired state applied");

        if let Some(config) = &children.config {
            if let Err(e) = self.builder.ensure_config(ns, config).await {
                warn!(namespace = %ns, %name, error = %e, "config sync failed");
            }
        }

        match &children.network {
            Some(ingress) => {
                if let Err(e) = self.builder.ensure_network(ns, ingress).await {
                    warn!(namespace = %ns, %name, error = %e, "network sync failed");
                }
            }
            None => match self.builder.remove_network(ns, name).await {
                Ok(true) => info!(namespace = %ns, %name, "network ingress removed"),
                Ok(false) => {}
                Err(e) => warn!(namespace = %ns, %name, error = %e, "network removal failed"),
            },
        }

        Ok(outcome)
    }
}

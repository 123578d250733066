//! Task wiring for the operator.
//!
//! Spawns one watcher/controller pair per workload kind plus the three
//! recurrent tasks (metering, idle, expiry). Every task observes the same
//! shutdown channel and returns once it flips.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use fleet_controller::{Controller, ResourceBuilder, Watcher, event_queue};
use fleet_core::{FleetConfig, RecurrentTask};
use fleet_lifecycle::{ExpiryEvaluator, HeartbeatProbe, HeartbeatRecorder, IdleEvaluator};
use fleet_metrics::{MeteringEngine, MetricsRegistry};
use fleet_state::{StateStore, TenancyResolver, WorkloadKind};

/// Shared handles every task is built from.
#[derive(Clone)]
pub struct FleetServices {
    pub store: StateStore,
    pub builder: Arc<dyn ResourceBuilder>,
    pub tenancy: Arc<dyn TenancyResolver>,
    pub metrics: Arc<MetricsRegistry>,
    pub probe: Arc<dyn HeartbeatProbe>,
}

pub fn spawn_fleet(
    services: &FleetServices,
    config: &FleetConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for kind in WorkloadKind::ALL {
        let (tx, rx) = event_queue(config.controller.queue_capacity);
        let controller = Controller::new(
            kind,
            services.store.clone(),
            services.builder.clone(),
            services.tenancy.clone(),
            config.rates.clone(),
        );
        let watcher = Watcher::new(
            kind,
            services.store.clone(),
            services.builder.clone(),
            tx,
            config.controller.poll(),
            config.controller.resync(),
        );

        let controller_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            controller.run(rx, controller_shutdown).await;
        }));
        handles.push(tokio::spawn(watcher.run(shutdown.clone())));
    }
    info!(kinds = WorkloadKind::ALL.len(), "controllers started");

    let metering = Arc::new(MeteringEngine::new(
        services.store.clone(),
        services.metrics.clone(),
        services.tenancy.clone(),
        config.metering.interval_secs,
    ));
    let task = RecurrentTask::new(
        "metering",
        config.metering.interval(),
        config.metering.min_interval(),
    );
    handles.push(tokio::spawn(metering.run(task, shutdown.clone())));

    let recorder = HeartbeatRecorder::new(
        services.store.clone(),
        services.probe.clone(),
        services.metrics.clone(),
        services.tenancy.clone(),
    );
    let idle = Arc::new(IdleEvaluator::new(
        services.store.clone(),
        recorder,
        config.idle.clone(),
    ));
    let task = RecurrentTask::new("idle", config.idle.interval(), config.idle.min_interval());
    handles.push(tokio::spawn(idle.run(task, shutdown.clone())));

    let expiry = Arc::new(ExpiryEvaluator::new(
        services.store.clone(),
        config.expiry.clone(),
    ));
    let task = RecurrentTask::new(
        "expiry",
        config.expiry.interval(),
        config.expiry.min_interval(),
    );
    handles.push(tokio::spawn(expiry.run(task, shutdown)));

    handles
}

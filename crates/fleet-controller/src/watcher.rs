//! Change watcher for one workload kind.
//!
//! Polls the state store and the resource builder, diffs against what it
//! saw last, and turns the differences into ordered `WorkloadEvent`s:
//!
//! ```text
//! store ──list_by_kind──► known instances ──diff──► Added / Modified / Deleted
//! builder ──observe────► health fingerprints ─diff─► Observed
//! ```
//!
//! Every `resync` interval all live instances are re-delivered as
//! `Modified`, and every instance with observed health as `Observed`, so a
//! failed reconcile or status derivation is retried without any inline retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fleet_state::{StateStore, WorkloadInstance, WorkloadKind};
use fleet_status::ObservedHealth;

use crate::builder::ResourceBuilder;
use crate::error::ControllerResult;
use crate::event::{EventSender, WorkloadEvent};

pub struct Watcher {
    kind: WorkloadKind,
    store: StateStore,
    builder: Arc<dyn ResourceBuilder>,
    tx: EventSender,
    poll: Duration,
    resync: Duration,
    known: HashMap<String, WorkloadInstance>,
    fingerprints: HashMap<String, ObservedHealth>,
}

impl Watcher {
    pub fn new(
        kind: WorkloadKind,
        store: StateStore,
        builder: Arc<dyn ResourceBuilder>,
        tx: EventSender,
        poll: Duration,
        resync: Duration,
    ) -> Self {
        Self {
            kind,
            store,
            builder,
            tx,
            poll,
            resync,
            known: HashMap::new(),
            fingerprints: HashMap::new(),
        }
    }

    /// One watch pass. Returns the number of events sent, or `None` when the
    /// controller side of the queue is gone.
    pub async fn poll_once(&mut self, force_resync: bool) -> ControllerResult<Option<usize>> {
        let mut events = Vec::new();
        let current: HashMap<String, WorkloadInstance> = self
            .store
            .list_by_kind(self.kind)?
            .into_iter()
            .map(|i| (i.table_key(), i))
            .collect();

        for (key, instance) in &current {
            match self.known.get(key) {
                None => events.push(WorkloadEvent::Added(instance.clone())),
                Some(previous) if previous.uid != instance.uid => {
                    // Deleted and recreated between two polls.
                    events.push(WorkloadEvent::Deleted(previous.clone()));
                    self.fingerprints.remove(key);
                    events.push(WorkloadEvent::Added(instance.clone()));
                }
                Some(previous) if force_resync || previous.generation != instance.generation => {
                    events.push(WorkloadEvent::Modified(instance.clone()));
                }
                Some(_) => {}
            }
        }

        let mut vanished: Vec<&String> = self.known.keys().filter(|k| !current.contains_key(*k)).collect();
        vanished.sort();
        for key in vanished {
            if let Some(last) = self.known.get(key) {
                events.push(WorkloadEvent::Deleted(last.clone()));
            }
        }
        self.fingerprints.retain(|k, _| current.contains_key(k));

        let mut keys: Vec<&String> = current.keys().collect();
        keys.sort();
        for key in keys {
            let instance = &current[key];
            match self.builder.observe(&instance.namespace, &instance.name).await {
                Ok(Some(health)) => {
                    let changed = self.fingerprints.get(key) != Some(&health);
                    if changed || force_resync {
                        self.fingerprints.insert(key.clone(), health);
                        events.push(WorkloadEvent::Observed(key.clone()));
                    }
                }
                Ok(None) => {
                    self.fingerprints.remove(key);
                }
                Err(e) => {
                    warn!(kind = %self.kind, %key, error = %e, "observe failed");
                }
            }
        }

        self.known = current;

        let sent = events.len();
        for event in events {
            debug!(kind = %self.kind, event = event.label(), "emitting event");
            if self.tx.send(event).await.is_err() {
                return Ok(None);
            }
        }
        Ok(Some(sent))
    }

    /// Poll until shutdown or until the controller stops receiving.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(kind = %self.kind, poll_ms = self.poll.as_millis() as u64, "watcher started");
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_resync = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let resync = last_resync.elapsed() >= self.resync;
                    if resync {
                        last_resync = Instant::now();
                    }
                    match self.poll_once(resync).await {
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => warn!(kind = %self.kind, error = %e, "watch pass failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(kind = %self.kind, "watcher stopped");
    }
}

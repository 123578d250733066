//! Per-instance usage cache.
//!
//! Holds what the previous metering tick saw for each instance uid so the
//! next tick can compute deltas. Written once per instance per tick.

use std::collections::{HashMap, HashSet};

use fleet_state::RunningStatus;
use tokio::sync::RwLock;

use crate::registry::InstanceLabels;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Epoch ms of the tick that wrote this entry.
    pub last_checked: u64,
    /// Uptime in seconds at that tick; `None` when the instance had no start time.
    pub up_time_secs: Option<u64>,
    pub running_status: RunningStatus,
    /// Labels the instance was reported under, if it could be labelled.
    pub labels: Option<InstanceLabels>,
}

#[derive(Debug, Default)]
pub struct UsageCache {
    entries: RwLock<HashMap<String, UsageSnapshot>>,
}

impl UsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uid: &str) -> Option<UsageSnapshot> {
        self.entries.read().await.get(uid).cloned()
    }

    /// Overwrite the entry for `uid`.
    pub async fn put(&self, uid: &str, snapshot: UsageSnapshot) {
        self.entries.write().await.insert(uid.to_string(), snapshot);
    }

    /// Drop every entry whose uid is not in `live` and return the dropped entries.
    pub async fn retain_live(&self, live: &HashSet<String>) -> Vec<(String, UsageSnapshot)> {
        let mut entries = self.entries.write().await;
        let gone: Vec<String> = entries
            .keys()
            .filter(|uid| !live.contains(*uid))
            .cloned()
            .collect();
        gone.into_iter()
            .filter_map(|uid| entries.remove(&uid).map(|snap| (uid, snap)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

//! fleet.toml configuration parser.
//!
//! Every section is optional; a missing file or a missing key falls back to
//! the defaults the operator ships with.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub metering: MeteringConfig,
    pub idle: IdleConfig,
    pub expiry: ExpiryConfig,
    pub controller: ControllerConfig,
    pub rates: RateCard,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeteringConfig {
    /// Desired scrape cadence.
    pub interval_secs: u64,
    /// Floor between two scrapes, however slow the previous one was.
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdleConfig {
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    /// Inactivity after which a running workspace is paused.
    pub threshold_secs: u64,
    /// Heartbeat observations older than this are not trusted.
    pub freshness_secs: u64,
    /// When false, idle workspaces are only logged.
    pub pause_idle: bool,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpiryConfig {
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub window_days: u64,
    /// Hard-delete instances once they are marked expired.
    pub delete_expired: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Full re-delivery of every live instance.
    pub resync_secs: u64,
    /// Watcher polling cadence.
    pub poll_ms: u64,
    pub queue_capacity: usize,
}

/// Billing rates, in DCU per minute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateCard {
    /// Per replica, keyed by compute class.
    pub compute: BTreeMap<String, u64>,
    /// Per GB per volume, keyed by storage class.
    pub storage_per_gb: BTreeMap<String, u64>,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            min_interval_secs: 30,
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_interval_secs: 300,
            threshold_secs: 1800,
            freshness_secs: 20,
            pause_idle: true,
            probe_timeout_ms: 2000,
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2 * 60 * 60,
            min_interval_secs: 2 * 60 * 60,
            window_days: 14,
            delete_expired: false,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_secs: 60,
            poll_ms: 1000,
            queue_capacity: 256,
        }
    }
}

impl Default for RateCard {
    fn default() -> Self {
        let compute = [("nano", 2), ("small", 5), ("medium", 10), ("large", 20)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let storage_per_gb = [("gp3", 8), ("fast", 16)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            compute,
            storage_per_gb,
        }
    }
}

impl RateCard {
    /// Compute DCU per minute for `replicas` replicas of a compute class.
    /// Unknown classes are not billed.
    pub fn compute_dcu_per_min(&self, compute_class: &str, replicas: u32) -> u64 {
        self.compute
            .get(compute_class)
            .map(|rate| rate.saturating_mul(u64::from(replicas)))
            .unwrap_or(0)
    }

    /// Storage DCU per minute for `volumes` claims of `size_gb` each.
    pub fn storage_dcu_per_min(&self, storage_class: &str, size_gb: u64, volumes: u32) -> u64 {
        self.storage_per_gb
            .get(storage_class)
            .map(|rate| {
                rate.saturating_mul(size_gb)
                    .saturating_mul(u64::from(volumes))
            })
            .unwrap_or(0)
    }
}

impl MeteringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

impl IdleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_secs.saturating_mul(1000)
    }

    pub fn freshness_ms(&self) -> u64 {
        self.freshness_secs.saturating_mul(1000)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

impl ExpiryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn window_ms(&self) -> u64 {
        self.window_days.saturating_mul(MILLIS_PER_DAY)
    }
}

impl ControllerConfig {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that would make a loop spin or never fire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("metering.min_interval_secs", self.metering.min_interval_secs),
            ("idle.min_interval_secs", self.idle.min_interval_secs),
            ("expiry.min_interval_secs", self.expiry.min_interval_secs),
            ("controller.poll_ms", self.controller.poll_ms),
            ("metering.interval_secs", self.metering.interval_secs),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
            }
        }
        if self.controller.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "controller.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

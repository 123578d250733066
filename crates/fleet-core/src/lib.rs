//! fleet-core — shared building blocks for the fleet operator.
//!
//! - [`config`] loads `fleet.toml` and carries the billing rate card.
//! - [`schedule`] runs periodic work with a floor interval between runs.
//! - [`time`] provides epoch-millisecond timestamps.
//!
//! # Architecture
//!
//! ```text
//! fleetd
//!   ├── FleetConfig ──► controllers, metering, idle, expiry
//!   └── RecurrentTask
//!         ├── metering tick   (30 s)
//!         ├── idle tick       (5 min)
//!         └── expiry tick     (2 h)
//! ```

pub mod config;
pub mod schedule;
pub mod time;

pub use config::{
    ConfigError, ControllerConfig, ExpiryConfig, FleetConfig, IdleConfig, MeteringConfig,
    RateCard,
};
pub use schedule::{RecurrentTask, TickReport};
pub use time::epoch_millis;

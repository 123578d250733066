//! fleetd — the fleet operator daemon.
//!
//! Library half of the daemon so the router and task wiring can be driven
//! from integration tests; `main.rs` only parses flags and waits for Ctrl-C.

pub mod api;
pub mod daemon;

pub use api::{ApiState, InstanceRequest, build_router};
pub use daemon::{FleetServices, spawn_fleet};

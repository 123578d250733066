//! fleet-controller — per-kind reconciliation of workload instances.
//!
//! One watcher/controller pair runs for every workload kind:
//!
//! ```text
//!  StateStore ─┐
//!              ├─► Watcher ──events──► Controller ──► ResourceBuilder
//!  Builder ────┘   (poll + resync)     (KindProfile)   (compute, storage,
//!                                          │            config, network)
//!                                          └──► status patches ─► StateStore
//! ```
//!
//! Kind-specific behaviour (children, rollout style, active statuses,
//! storage and idle support) lives behind [`KindProfile`]. Infrastructure
//! is reached only through the [`ResourceBuilder`] port;
//! [`InMemoryBuilder`] is the in-process implementation.

pub mod builder;
pub mod controller;
pub mod error;
pub mod event;
pub mod kinds;
pub mod memory;
pub mod watcher;

pub use builder::{
    ChildResourceSet, ComputePatch, ComputeUnit, ConfigObject, ContainerSpec, NetworkIngress,
    OwnerReference, ResourceBuilder, StorageClaim, VolumeSource, VolumeSpec,
};
pub use controller::{ApplyOutcome, Controller};
pub use error::{ControllerError, ControllerResult, InfraError};
pub use event::{EventReceiver, EventSender, WorkloadEvent, event_queue};
pub use kinds::{KindProfile, profile_for};
pub use memory::{FailPoint, InMemoryBuilder};
pub use watcher::Watcher;

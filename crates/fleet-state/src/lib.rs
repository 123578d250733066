//! fleet-state — embedded store of workload instances.
//!
//! Backed by [redb](https://docs.rs/redb). Each `WorkloadInstance` is
//! JSON-serialized under the composite key `{namespace}/{name}`.
//!
//! # Write paths
//!
//! ```text
//! API / tests ──► upsert_instance ──► generation += 1 on spec change
//! idle manager ─► patch_spec      ──► generation += 1 on spec change
//! controller ───► patch_status    ──► status fields replaced, generation kept
//! ```
//!
//! Every committed write bumps `resource_version`. Watchers key off
//! `generation`, so status-only writes never re-trigger reconciliation.

pub mod error;
pub mod store;
pub mod tables;
pub mod tenancy;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use tenancy::{PrefixTenancy, Project, TenancyResolver};
pub use types::*;

//! fleet-lifecycle — idle pause and dormant expiry of interactive workloads.
//!
//! ```text
//!  RecurrentTask (idle) ──► IdleEvaluator ──► HeartbeatRecorder ──► HeartbeatProbe
//!                                │                  │
//!                                │                  └─► last_seen / last-activity gauge
//!                                └─► spec.enabled = false  (soft pause)
//!
//!  RecurrentTask (expiry) ─► ExpiryEvaluator ─► status = expired, storage DCU 0
//!                                           └─► delete (when delete_expired)
//! ```

pub mod expiry;
pub mod heartbeat;
pub mod idle;

pub use expiry::{ExpiryEvaluator, ExpirySummary, check_expiry};
pub use heartbeat::{HeartbeatProbe, HeartbeatRecorder, HttpHeartbeatProbe, ProbeError};
pub use idle::{Activity, IdleEvaluator, IdleSummary, check_activity, heartbeat_activity};

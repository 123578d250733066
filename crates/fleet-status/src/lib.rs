//! fleet-status — canonical lifecycle status from noisy health signals.
//!
//! Derivation is a pure function of the desired replica count, the
//! observed health of the compute unit, and the previously recorded
//! status. The previous status supplies hysteresis: an instance that was
//! just (re)started is not flagged as failed while its replicas come up.
//!
//! ```text
//! ObservedHealth ─┐
//! previous ───────┼──► derive_status() ──► RunningStatus ──► status_gauge()
//! RolloutStyle ───┘
//! ```

pub mod derive;

pub use derive::{ObservedHealth, PodPhase, RolloutStyle, derive_status, status_gauge};

//! Errors raised by the instance store.

use thiserror::Error;

use crate::types::WorkloadKind;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// redb failed while opening, reading or committing.
    #[error("state database {op} failed: {reason}")]
    Storage { op: &'static str, reason: String },

    /// A stored instance record no longer decodes.
    #[error("instance record {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("instance {key} could not be encoded: {reason}")]
    Encode { key: String, reason: String },

    /// A patch or lookup addressed a key with no instance behind it.
    #[error("no instance at {0}")]
    NotFound(String),

    #[error("instance {key} is a {existing} workload, not {requested}")]
    KindMismatch {
        key: String,
        existing: WorkloadKind,
        requested: WorkloadKind,
    },
}

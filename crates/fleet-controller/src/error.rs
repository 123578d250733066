//! Controller error types.

use thiserror::Error;

/// Failure talking to the infrastructure. Never retried inline; the
/// watcher's periodic resync re-delivers the instance.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("{resource} {namespace}/{name} not found")]
    NotFound {
        resource: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{resource} {namespace}/{name} already exists")]
    AlreadyExists {
        resource: &'static str,
        namespace: String,
        name: String,
    },

    #[error("infrastructure unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("infrastructure error: {0}")]
    Infra(#[from] InfraError),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),

    /// The instance cannot be attributed to a project. Nothing is written.
    #[error("data integrity: {0}")]
    DataIntegrity(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

//! Engine errors

use cw_domain::{DomainError, FieldError};
use cw_ports::{QueueError, StorageError, StoreError};
use thiserror::Error;

/// Errors surfaced by engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("form validation failed")]
    InvalidForm(Vec<FieldError>),

    #[error("action {action} is not valid in state {state}")]
    InvalidStateForAction { state: String, action: String },

    #[error("processing is already running")]
    AlreadyRunning,

    #[error("application is in a terminal state: {state}")]
    Terminal { state: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Whether this maps to a not-found at the API boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::NotFound { .. }))
    }
}

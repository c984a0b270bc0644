//! Domain errors

use thiserror::Error;

use crate::form::FieldError;

/// Domain errors for the eligibility workflow.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("action {action} is not valid in state {state}")]
    InvalidStateForAction { state: String, action: String },

    #[error("form validation failed: {0:?}")]
    InvalidForm(Vec<FieldError>),
}

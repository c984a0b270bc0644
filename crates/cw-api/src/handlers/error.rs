//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cw_domain::FieldError;
use cw_engine::EngineError;
use cw_ports::StoreError;
use serde::Serialize;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types with stable error codes for the UI.
#[derive(Debug)]
pub enum ApiError {
    /// Application (or other resource) not found, or owned by someone else.
    NotFound { id: String },
    /// Request body failed validation.
    InvalidForm { errors: Vec<FieldError> },
    /// Malformed request outside form validation.
    BadRequest { message: String },
    /// Action not valid for the current workflow state.
    InvalidState { state: String, action: String },
    /// Processing already in flight.
    AlreadyRunning,
    /// The application is in a terminal state.
    Terminal { state: String },
    /// Upload content type not accepted.
    UnsupportedFormat { content_type: String },
    /// Upload exceeds the size ceiling.
    FileTooLarge { limit: i64 },
    /// Internal server error.
    Internal { message: String },
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, error, details) = match &self {
            ApiError::NotFound { id } => (
                StatusCode::NOT_FOUND,
                "APP_NOT_FOUND",
                format!("application not found: {id}"),
                None,
            ),
            ApiError::InvalidForm { errors } => (
                StatusCode::BAD_REQUEST,
                "INVALID_FORM",
                "form validation failed".to_string(),
                Some(serde_json::json!({ "fields": errors })),
            ),
            ApiError::BadRequest { message } => (
                StatusCode::BAD_REQUEST,
                "INVALID_FORM",
                message.clone(),
                None,
            ),
            ApiError::InvalidState { state, action } => (
                StatusCode::CONFLICT,
                "INVALID_STATE",
                format!("cannot {action} in state {state}"),
                Some(serde_json::json!({ "state": state, "action": action })),
            ),
            ApiError::AlreadyRunning => (
                StatusCode::CONFLICT,
                "ALREADY_RUNNING",
                "processing is already running".to_string(),
                None,
            ),
            ApiError::Terminal { state } => (
                StatusCode::CONFLICT,
                "TERMINAL",
                format!("application is {state}"),
                Some(serde_json::json!({ "state": state })),
            ),
            ApiError::UnsupportedFormat { content_type } => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_FORMAT",
                format!("unsupported content type: {content_type}"),
                None,
            ),
            ApiError::FileTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "FILE_TOO_LARGE",
                format!("file exceeds the {limit} byte limit"),
                None,
            ),
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "internal server error".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error,
            code: status.as_u16(),
            error_code,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidForm(errors) => ApiError::InvalidForm { errors },
            EngineError::InvalidStateForAction { state, action } => {
                ApiError::InvalidState { state, action }
            }
            EngineError::AlreadyRunning => ApiError::AlreadyRunning,
            EngineError::Terminal { state } => ApiError::Terminal { state },
            EngineError::Store(StoreError::NotFound { id, .. }) => ApiError::NotFound { id },
            EngineError::Store(StoreError::InvalidState { state, action }) => {
                ApiError::InvalidState { state, action }
            }
            EngineError::Store(StoreError::Busy) => ApiError::AlreadyRunning,
            EngineError::Domain(e) => ApiError::BadRequest {
                message: e.to_string(),
            },
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

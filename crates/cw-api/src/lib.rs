//! Casework HTTP API.
//!
//! Axum service exposing the workflow endpoints: start-application,
//! upload-documents, process, status, and cancel, all behind bearer
//! authentication.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::{AuthConfig, AuthenticatedUser, BearerAuth};
pub use routes::router;
pub use state::AppState;

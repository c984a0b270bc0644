//! Router construction.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use cw_ports::{ApplicationStore, BlobStore, JobQueue};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::handlers::{applications, documents, status};
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the service router over any store/queue/blob adapters.
pub fn router<S, Q, B>(state: AppState<S, Q, B>) -> Router
where
    S: ApplicationStore + 'static,
    Q: JobQueue + 'static,
    B: BlobStore + 'static,
{
    // Leave room for multipart framing around a maximum-size file.
    let body_limit = state.engine.config().max_file_size_bytes as usize + 64 * 1024;

    Router::new()
        .route("/health", get(health))
        .route(
            "/workflow/start-application",
            post(applications::start_application::<S, Q, B>),
        )
        .route(
            "/workflow/upload-documents/:application_id",
            post(documents::upload_documents::<S, Q, B>),
        )
        .route(
            "/workflow/process/:application_id",
            post(applications::process::<S, Q, B>),
        )
        .route(
            "/workflow/status/:application_id",
            get(status::status::<S, Q, B>),
        )
        .route(
            "/workflow/cancel/:application_id",
            post(applications::cancel::<S, Q, B>),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

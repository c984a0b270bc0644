//! Application lifecycle handlers: start, process, cancel.

use axum::{
    extract::{Path, State},
    Json,
};
use cw_domain::{ApplicantFormInput, ApplicationId};
use cw_ports::{ApplicationStore, BlobStore, JobQueue};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::AuthenticatedUser;
use crate::handlers::ApiResult;
use crate::state::AppState;

/// Response for application creation.
#[derive(Debug, Serialize)]
pub struct StartApplicationResponse {
    pub application_id: String,
    pub state: String,
    pub progress: u8,
}

/// Request to begin (or retry) processing.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub force_retry: bool,
}

/// Response for the process action.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub state: String,
    pub estimated_completion_seconds: u64,
    pub job_id: String,
}

/// Response for cancellation.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub state: String,
}

/// Create an application from the submitted form.
///
/// POST /workflow/start-application
#[instrument(skip(state, user, body), fields(owner_id = %user.owner_id.as_str()))]
pub async fn start_application<S, Q, B>(
    State(state): State<AppState<S, Q, B>>,
    user: AuthenticatedUser,
    Json(body): Json<ApplicantFormInput>,
) -> ApiResult<Json<StartApplicationResponse>>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    let app = state
        .engine
        .start_application(&user.owner_id, &body)
        .await?;

    info!(application_id = %app.id.as_str(), "application created");
    Ok(Json(StartApplicationResponse {
        application_id: app.id.as_str().to_string(),
        state: app.state.as_str().to_string(),
        progress: app.state.progress(),
    }))
}

/// Begin asynchronous processing.
///
/// POST /workflow/process/{application_id}
#[instrument(skip(state, user, body), fields(owner_id = %user.owner_id.as_str()))]
pub async fn process<S, Q, B>(
    State(state): State<AppState<S, Q, B>>,
    user: AuthenticatedUser,
    Path(application_id): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> ApiResult<Json<ProcessResponse>>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    let application_id = ApplicationId::from_string(application_id);
    let force_retry = body.map(|Json(b)| b.force_retry).unwrap_or(false);

    let started = state
        .engine
        .begin_processing(&user.owner_id, &application_id, force_retry)
        .await?;

    Ok(Json(ProcessResponse {
        state: started.application.state.as_str().to_string(),
        estimated_completion_seconds: started.estimated_completion_seconds,
        job_id: started.job_id.as_str().to_string(),
    }))
}

/// Cancel the workflow.
///
/// POST /workflow/cancel/{application_id}
#[instrument(skip(state, user), fields(owner_id = %user.owner_id.as_str()))]
pub async fn cancel<S, Q, B>(
    State(state): State<AppState<S, Q, B>>,
    user: AuthenticatedUser,
    Path(application_id): Path<String>,
) -> ApiResult<Json<CancelResponse>>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    let application_id = ApplicationId::from_string(application_id);
    let app = state.engine.cancel(&user.owner_id, &application_id).await?;

    Ok(Json(CancelResponse {
        state: app.state.as_str().to_string(),
    }))
}

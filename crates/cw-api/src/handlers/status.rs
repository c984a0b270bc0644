//! Workflow status handler.

use axum::{
    extract::{Path, State},
    Json,
};
use cw_domain::ApplicationId;
use cw_engine::ProgressReport;
use cw_ports::{ApplicationStore, BlobStore, JobQueue};
use tracing::instrument;

use crate::auth::AuthenticatedUser;
use crate::handlers::ApiResult;
use crate::state::AppState;

/// Progress payload for the polling UI.
///
/// GET /workflow/status/{application_id}
#[instrument(skip(state, user), fields(owner_id = %user.owner_id.as_str()))]
pub async fn status<S, Q, B>(
    State(state): State<AppState<S, Q, B>>,
    user: AuthenticatedUser,
    Path(application_id): Path<String>,
) -> ApiResult<Json<ProgressReport>>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    let application_id = ApplicationId::from_string(application_id);
    let report = state
        .engine
        .progress(&user.owner_id, &application_id)
        .await?;
    Ok(Json(report))
}

//! Document upload handler.

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use cw_domain::{ApplicationId, DocumentKind};
use cw_engine::DocumentSpec;
use cw_ports::{ApplicationStore, BlobMeta, BlobStore, DocumentMeta, JobQueue};
use serde::Serialize;
use tracing::{info, instrument};

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

/// Content types the storage and OCR collaborators accept.
const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
];

/// Response for the upload action.
#[derive(Debug, Serialize)]
pub struct UploadDocumentsResponse {
    pub document_ids: Vec<String>,
    pub state: String,
    pub progress: u8,
}

/// Attach up to two documents as multipart parts named `bank_statement` and
/// `identity_card`.
///
/// POST /workflow/upload-documents/{application_id}
#[instrument(skip(state, user, multipart), fields(owner_id = %user.owner_id.as_str()))]
pub async fn upload_documents<S, Q, B>(
    State(state): State<AppState<S, Q, B>>,
    user: AuthenticatedUser,
    Path(application_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadDocumentsResponse>>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    let application_id = ApplicationId::from_string(application_id);
    let max_bytes = state.engine.config().max_file_size_bytes;

    let mut specs = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::BadRequest {
            message: format!("malformed multipart body: {e}"),
        }
    })? {
        let kind = match field.name() {
            Some("bank_statement") => DocumentKind::BankStatement,
            Some("identity_card") => DocumentKind::IdentityCard,
            Some(other) => {
                return Err(ApiError::BadRequest {
                    message: format!("unexpected part: {other}"),
                })
            }
            None => {
                return Err(ApiError::BadRequest {
                    message: "multipart part without a name".to_string(),
                })
            }
        };

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{}.bin", kind.as_str().to_lowercase()));
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(ApiError::UnsupportedFormat { content_type });
        }

        let content = field.bytes().await.map_err(|e| ApiError::BadRequest {
            message: format!("failed to read part body: {e}"),
        })?;
        // A file exactly at the limit is accepted.
        if content.len() as i64 > max_bytes {
            return Err(ApiError::FileTooLarge { limit: max_bytes });
        }

        let byte_size = content.len() as i64;
        let handle = state
            .blobs
            .put(
                content,
                &BlobMeta {
                    filename: filename.clone(),
                    content_type: content_type.clone(),
                },
            )
            .await
            .map_err(|e| ApiError::Internal {
                message: e.to_string(),
            })?;

        specs.push(DocumentSpec {
            kind,
            storage_handle: handle,
            meta: DocumentMeta {
                filename,
                byte_size,
                content_type,
            },
        });
    }

    if specs.is_empty() {
        return Err(ApiError::BadRequest {
            message: "no documents in request".to_string(),
        });
    }

    let (documents, app) = state
        .engine
        .upload_documents(&user.owner_id, &application_id, specs)
        .await?;

    info!(
        application_id = %application_id.as_str(),
        documents = documents.len(),
        "documents uploaded"
    );
    Ok(Json(UploadDocumentsResponse {
        document_ids: documents
            .iter()
            .map(|d| d.id.as_str().to_string())
            .collect(),
        state: app.state.as_str().to_string(),
        progress: app.state.progress(),
    }))
}

//! Multimodal structured-extraction executor.

use std::sync::Arc;
use std::time::Duration;

use cw_domain::{DocumentId, DocumentKind, StageErrorKind, StageFailure};
use cw_ports::{BlobStore, CancelSignal, ExtractUpstream};
use tracing::instrument;

use super::classify_upstream;

/// Typed input for one extraction execution.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub storage_handle: String,
    pub ocr_text: String,
}

/// Kind-specific structured fields plus the extraction confidence.
#[derive(Debug, Clone)]
pub struct ExtractOutput {
    pub fields: serde_json::Value,
    pub confidence: f64,
}

/// Runs the multimodal extraction collaborator against one document.
pub struct ExtractExecutor<U, B> {
    upstream: Arc<U>,
    blobs: Arc<B>,
    timeout: Duration,
}

impl<U: ExtractUpstream, B: BlobStore> ExtractExecutor<U, B> {
    pub fn new(upstream: Arc<U>, blobs: Arc<B>, timeout: Duration) -> Self {
        Self {
            upstream,
            blobs,
            timeout,
        }
    }

    #[instrument(
        skip(self, cancel),
        fields(document_id = %request.document_id.as_str(), kind = request.kind.as_str())
    )]
    pub async fn run(
        &self,
        request: &ExtractRequest,
        cancel: &CancelSignal,
    ) -> Result<ExtractOutput, StageFailure> {
        if cancel.is_cancelled() {
            return Err(StageFailure::new(
                StageErrorKind::Cancelled,
                "cancelled before dispatch",
            ));
        }

        let content = self
            .blobs
            .open(&request.storage_handle)
            .await
            .map_err(|e| StageFailure::new(StageErrorKind::Transient, e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(StageFailure::new(
                StageErrorKind::Cancelled,
                "cancelled before upstream call",
            ));
        }

        let fields = match tokio::time::timeout(
            self.timeout,
            self.upstream
                .extract_structured(request.kind, content, &request.ocr_text, cancel),
        )
        .await
        {
            Err(_) => {
                return Err(StageFailure::new(
                    StageErrorKind::Timeout,
                    format!("extraction timed out after {}s", self.timeout.as_secs()),
                ))
            }
            Ok(Err(e)) => return Err(classify_upstream(e)),
            Ok(Ok(fields)) => fields,
        };

        if !fields.is_object() {
            return Err(StageFailure::new(
                StageErrorKind::ParseFailed,
                "extraction returned a non-object payload",
            ));
        }

        let confidence = fields
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(ExtractOutput { fields, confidence })
    }
}

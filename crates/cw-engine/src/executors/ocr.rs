//! OCR stage executor.

use std::sync::Arc;
use std::time::Duration;

use cw_domain::{DocumentId, StageErrorKind, StageFailure};
use cw_ports::{BlobStore, CancelSignal, OcrOutput, OcrUpstream};
use tracing::instrument;

use super::classify_upstream;

/// OCR results below this confidence are treated as empty.
pub const MIN_OCR_CONFIDENCE: f64 = 0.1;

/// Typed input for one OCR execution.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document_id: DocumentId,
    pub storage_handle: String,
    pub content_type: String,
}

/// Runs the OCR collaborator against one stored document.
pub struct OcrExecutor<U, B> {
    upstream: Arc<U>,
    blobs: Arc<B>,
    timeout: Duration,
}

impl<U: OcrUpstream, B: BlobStore> OcrExecutor<U, B> {
    pub fn new(upstream: Arc<U>, blobs: Arc<B>, timeout: Duration) -> Self {
        Self {
            upstream,
            blobs,
            timeout,
        }
    }

    #[instrument(skip(self, cancel), fields(document_id = %request.document_id.as_str()))]
    pub async fn run(
        &self,
        request: &OcrRequest,
        cancel: &CancelSignal,
    ) -> Result<OcrOutput, StageFailure> {
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

        let output = match tokio::time::timeout(
            self.timeout,
            self.upstream
                .extract_text(content, &request.content_type, cancel),
        )
        .await
        {
            Err(_) => {
                return Err(StageFailure::new(
                    StageErrorKind::Timeout,
                    format!("ocr timed out after {}s", self.timeout.as_secs()),
                ))
            }
            Ok(Err(e)) => return Err(classify_upstream(e)),
            Ok(Ok(output)) => output,
        };

        if output.text.trim().is_empty() || output.confidence < MIN_OCR_CONFIDENCE {
            return Err(StageFailure::new(
                StageErrorKind::EmptyResult,
                format!(
                    "ocr produced no usable text (confidence {:.2})",
                    output.confidence
                ),
            ));
        }

        Ok(output)
    }
}

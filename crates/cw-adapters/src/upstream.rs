//! HTTP clients for the model collaborators.
//!
//! Three thin reqwest clients covering the OCR engine, the multimodal
//! extraction service, and the decision model. Each maps transport and
//! status failures onto [`UpstreamError`] for the executors to classify.
//! Monetary fields in extraction and decision payloads are currency minor
//! units end to end.

use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use cw_domain::{DecisionOutcome, DocumentKind, ModelVerdict};
use cw_ports::{
    CancelSignal, DecisionUpstream, ExtractUpstream, OcrOutput, OcrUpstream, UpstreamError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Upstream collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub ocr_url: String,
    pub extract_url: String,
    pub decision_url: String,
    /// Per-request transport timeout; the stage timeout in the executor is
    /// the outer bound.
    pub request_timeout_s: u64,
}

impl UpstreamConfig {
    pub fn local_dev() -> Self {
        Self {
            ocr_url: "http://localhost:8100".to_string(),
            extract_url: "http://localhost:8101".to_string(),
            decision_url: "http://localhost:8102".to_string(),
            request_timeout_s: 120,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::local_dev();
        Self {
            ocr_url: std::env::var("OCR_UPSTREAM_URL").unwrap_or(defaults.ocr_url),
            extract_url: std::env::var("EXTRACT_UPSTREAM_URL").unwrap_or(defaults.extract_url),
            decision_url: std::env::var("DECISION_UPSTREAM_URL").unwrap_or(defaults.decision_url),
            request_timeout_s: std::env::var("UPSTREAM_REQUEST_TIMEOUT_S")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_s),
        }
    }
}

fn http_client(timeout_s: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_s))
        .build()
        .unwrap_or_default()
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() || e.is_connect() {
        UpstreamError::Unavailable {
            message: e.to_string(),
        }
    } else {
        UpstreamError::Transient {
            message: e.to_string(),
        }
    }
}

fn status_error(status: reqwest::StatusCode, body: String) -> UpstreamError {
    if status.is_server_error() || status.as_u16() == 429 {
        UpstreamError::Unavailable {
            message: format!("{status}: {body}"),
        }
    } else if status.as_u16() == 415 || status.as_u16() == 400 {
        UpstreamError::Unsupported {
            message: format!("{status}: {body}"),
        }
    } else {
        UpstreamError::Transient {
            message: format!("{status}: {body}"),
        }
    }
}

// ============================================================================
// OCR
// ============================================================================

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
    confidence: f64,
    #[serde(default)]
    pages: u32,
}

/// HTTP [`OcrUpstream`]. Document bytes go up as the request body.
pub struct HttpOcrClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: http_client(config.request_timeout_s),
            base_url: config.ocr_url.clone(),
        }
    }
}

impl OcrUpstream for HttpOcrClient {
    #[instrument(skip(self, content, cancel), fields(bytes = content.len()))]
    async fn extract_text(
        &self,
        content: Bytes,
        content_type: &str,
        cancel: &CancelSignal,
    ) -> Result<OcrOutput, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        let response = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: OcrResponse = response.json().await.map_err(|e| UpstreamError::Parse {
            message: e.to_string(),
        })?;
        debug!(confidence = parsed.confidence, pages = parsed.pages, "ocr response received");
        Ok(OcrOutput {
            text: parsed.text,
            confidence: parsed.confidence,
            pages: parsed.pages,
        })
    }
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug, Serialize)]
struct ExtractRequestBody<'a> {
    kind: &'a str,
    ocr_text: &'a str,
    content: String,
    content_encoding: &'static str,
}

/// HTTP [`ExtractUpstream`]. The document image travels base64-encoded next
/// to the OCR text so the multimodal service sees both.
pub struct HttpExtractClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: http_client(config.request_timeout_s),
            base_url: config.extract_url.clone(),
        }
    }
}

impl ExtractUpstream for HttpExtractClient {
    #[instrument(skip(self, content, ocr_text, cancel), fields(kind = kind.as_str()))]
    async fn extract_structured(
        &self,
        kind: DocumentKind,
        content: Bytes,
        ocr_text: &str,
        cancel: &CancelSignal,
    ) -> Result<serde_json::Value, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        let body = ExtractRequestBody {
            kind: kind.as_str(),
            ocr_text,
            content: base64::engine::general_purpose::STANDARD.encode(&content),
            content_encoding: "base64",
        };

        let response = self
            .client
            .post(format!("{}/v1/extract", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let fields: serde_json::Value =
            response.json().await.map_err(|e| UpstreamError::Parse {
                message: e.to_string(),
            })?;
        if !fields.is_object() {
            return Err(UpstreamError::Parse {
                message: "extraction payload is not an object".to_string(),
            });
        }
        Ok(fields)
    }
}

// ============================================================================
// Decision
// ============================================================================

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    outcome: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    benefit_amount: Option<i64>,
}

/// HTTP [`DecisionUpstream`].
pub struct HttpDecisionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDecisionClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: http_client(config.request_timeout_s),
            base_url: config.decision_url.clone(),
        }
    }
}

impl DecisionUpstream for HttpDecisionClient {
    #[instrument(skip(self, inputs, cancel))]
    async fn decide(
        &self,
        inputs: &serde_json::Value,
        cancel: &CancelSignal,
    ) -> Result<ModelVerdict, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        let response = self
            .client
            .post(format!("{}/v1/decide", self.base_url))
            .json(inputs)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: DecisionResponse =
            response.json().await.map_err(|e| UpstreamError::Parse {
                message: e.to_string(),
            })?;
        let outcome =
            DecisionOutcome::from_str(&parsed.outcome).map_err(|e| UpstreamError::Parse {
                message: e,
            })?;
        Ok(ModelVerdict {
            outcome,
            confidence: parsed.confidence,
            reasoning: parsed.reasoning,
            benefit_amount: parsed.benefit_amount,
        })
    }
}

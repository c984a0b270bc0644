//! Stage identifiers and the stage error taxonomy.

use serde::{Deserialize, Serialize};

/// A unit of upstream work in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Ocr,
    Extract,
    Decide,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ocr => "OCR",
            Stage::Extract => "EXTRACT",
            Stage::Decide => "DECIDE",
        }
    }

    /// Queue name the stage's jobs are routed to.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::Ocr => "stage.ocr",
            Stage::Extract => "stage.extract",
            Stage::Decide => "stage.decide",
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OCR" => Ok(Stage::Ocr),
            "EXTRACT" => Ok(Stage::Extract),
            "DECIDE" => Ok(Stage::Decide),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Classified stage failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageErrorKind {
    /// Retryable upstream hiccup.
    Transient,
    /// Upstream collaborator is unreachable or overloaded.
    UpstreamUnavailable,
    /// The per-stage wall-clock timeout elapsed.
    Timeout,
    /// Upstream answered but produced nothing usable.
    EmptyResult,
    /// Upstream output could not be parsed into the stage contract.
    ParseFailed,
    /// The document format is not accepted by the collaborator.
    UnsupportedFormat,
    /// The workflow was cancelled before or during the stage.
    Cancelled,
}

impl StageErrorKind {
    /// Whether the retry policy re-enqueues this failure. Retryable failures
    /// count toward `max_attempts_per_stage`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageErrorKind::Transient
                | StageErrorKind::UpstreamUnavailable
                | StageErrorKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageErrorKind::Transient => "TRANSIENT",
            StageErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            StageErrorKind::Timeout => "TIMEOUT",
            StageErrorKind::EmptyResult => "EMPTY_RESULT",
            StageErrorKind::ParseFailed => "PARSE_FAILED",
            StageErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            StageErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for StageErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSIENT" => Ok(StageErrorKind::Transient),
            "UPSTREAM_UNAVAILABLE" => Ok(StageErrorKind::UpstreamUnavailable),
            "TIMEOUT" => Ok(StageErrorKind::Timeout),
            "EMPTY_RESULT" => Ok(StageErrorKind::EmptyResult),
            "PARSE_FAILED" => Ok(StageErrorKind::ParseFailed),
            "UNSUPPORTED_FORMAT" => Ok(StageErrorKind::UnsupportedFormat),
            "CANCELLED" => Ok(StageErrorKind::Cancelled),
            other => Err(format!("unknown stage error kind: {other}")),
        }
    }
}

/// A classified stage failure as reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StageFailure {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

//! Progress projection.
//!
//! Read-only view of a store snapshot shaped for the polling UI. Never
//! mutates; progress is always derived from the current state.

use chrono::{DateTime, Utc};
use cw_domain::{
    ApplicationState, DecisionOutcome, DocumentKind, StageErrorKind, StageStatus, StepStatus,
};
use cw_ports::FullApplication;
use serde::Serialize;

/// What the applicant should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    UploadDocuments,
    AwaitProcessing,
    Retry,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub kind: DocumentKind,
    pub filename: String,
    pub ocr_status: StageStatus,
    pub ocr_confidence: Option<f64>,
    pub extract_status: StageStatus,
    pub extract_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_fields: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DocumentErrorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentErrorView {
    pub stage: &'static str,
    pub kind: StageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionView {
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    pub reasoning: String,
    pub benefit_amount: Option<i64>,
    pub decided_at: DateTime<Utc>,
}

/// Partial results available so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartialResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_extract: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_extract: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionView>,
}

/// The full progress payload served to the polling UI.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub overall_status: ApplicationState,
    pub progress: u8,
    pub elapsed_seconds: i64,
    pub steps: Vec<StepView>,
    pub documents: Vec<DocumentView>,
    pub partial_results: PartialResults,
    pub next_action: NextAction,
    pub can_retry: bool,
}

/// Project a snapshot into the progress payload.
pub fn progress_report(full: &FullApplication, now: DateTime<Utc>) -> ProgressReport {
    let app = &full.application;
    let state = app.state;

    let steps = full
        .steps
        .iter()
        .map(|s| StepView {
            name: s.step_name.clone(),
            status: s.status,
            message: s.message.clone(),
            started_at: s.started_at,
            completed_at: s.completed_at,
            duration_ms: s.duration_ms,
        })
        .collect();

    let documents = full
        .documents
        .iter()
        .map(|d| {
            let error = if let (Some(kind), Some(message)) =
                (d.ocr.error_kind, d.ocr.error_message.clone())
            {
                Some(DocumentErrorView {
                    stage: "ocr",
                    kind,
                    message,
                })
            } else if let (Some(kind), Some(message)) =
                (d.extract.error_kind, d.extract.error_message.clone())
            {
                Some(DocumentErrorView {
                    stage: "extract",
                    kind,
                    message,
                })
            } else {
                None
            };
            DocumentView {
                kind: d.kind,
                filename: d.filename.clone(),
                ocr_status: d.ocr.status,
                ocr_confidence: d.ocr.confidence,
                extract_status: d.extract.status,
                extract_confidence: d.extract.confidence,
                extracted_fields: d.extracted_fields.clone(),
                error,
            }
        })
        .collect();

    let extract_of = |kind: DocumentKind| {
        full.document(kind)
            .filter(|d| d.extract.status == StageStatus::Completed)
            .and_then(|d| d.extracted_fields.clone())
    };
    let partial_results = PartialResults {
        bank_extract: extract_of(DocumentKind::BankStatement),
        id_extract: extract_of(DocumentKind::IdentityCard),
        decision: full.decision.as_ref().map(|d| DecisionView {
            outcome: d.outcome,
            confidence: d.confidence,
            reasoning: d.reasoning.clone(),
            benefit_amount: d.benefit_amount,
            decided_at: d.decided_at,
        }),
    };

    let end = app.decided_at.unwrap_or(now);
    let elapsed_seconds = (end - app.created_at).num_seconds().max(0);

    ProgressReport {
        overall_status: state,
        progress: state.progress(),
        elapsed_seconds,
        steps,
        documents,
        partial_results,
        next_action: next_action(state),
        can_retry: state == ApplicationState::ProcessingFailed,
    }
}

fn next_action(state: ApplicationState) -> NextAction {
    match state {
        ApplicationState::Draft | ApplicationState::FormSubmitted => NextAction::UploadDocuments,
        ApplicationState::DocumentsUploaded
        | ApplicationState::ScanningDocuments
        | ApplicationState::OcrCompleted
        | ApplicationState::Analyzing
        | ApplicationState::AnalysisCompleted
        | ApplicationState::MakingDecision
        | ApplicationState::DecisionCompleted => NextAction::AwaitProcessing,
        ApplicationState::ProcessingFailed => NextAction::Retry,
        ApplicationState::Approved
        | ApplicationState::Rejected
        | ApplicationState::NeedsReview => NextAction::Completed,
        ApplicationState::Cancelled => NextAction::Cancelled,
    }
}

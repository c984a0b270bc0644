//! Domain entities for the eligibility workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::stage::StageErrorKind;

/// Application identifier: `app_<ULID>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new() -> Self {
        Self(format!("app_{}", Ulid::new()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Document identifier: `doc_<ULID>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new() -> Self {
        Self(format!("doc_{}", Ulid::new()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Workflow step identifier: `step_<ULID>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    pub fn new() -> Self {
        Self(format!("step_{}", Ulid::new()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage job identifier: `job_<ULID>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(format!("job_{}", Ulid::new()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque identity of the applicant, derived from the validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Workflow state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    Draft,
    FormSubmitted,
    DocumentsUploaded,
    ScanningDocuments,
    OcrCompleted,
    Analyzing,
    AnalysisCompleted,
    MakingDecision,
    DecisionCompleted,
    Approved,
    Rejected,
    NeedsReview,
    ProcessingFailed,
    Cancelled,
}

impl ApplicationState {
    /// UI progress percentage. A pure function of the state.
    pub fn progress(&self) -> u8 {
        match self {
            ApplicationState::Draft => 0,
            ApplicationState::FormSubmitted => 20,
            ApplicationState::DocumentsUploaded => 30,
            ApplicationState::ScanningDocuments => 40,
            ApplicationState::OcrCompleted => 50,
            ApplicationState::Analyzing => 60,
            ApplicationState::AnalysisCompleted => 70,
            ApplicationState::MakingDecision => 80,
            ApplicationState::DecisionCompleted => 90,
            ApplicationState::Approved => 100,
            ApplicationState::Rejected => 100,
            ApplicationState::NeedsReview => 100,
            ApplicationState::ProcessingFailed => 40,
            ApplicationState::Cancelled => 100,
        }
    }

    /// Terminal states admit no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationState::Approved
                | ApplicationState::Rejected
                | ApplicationState::NeedsReview
                | ApplicationState::Cancelled
        )
    }

    /// Terminal states reached through `DECISION_COMPLETED`; a Decision row
    /// exists iff the application sits in one of these.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            ApplicationState::Approved | ApplicationState::Rejected | ApplicationState::NeedsReview
        )
    }

    /// States in which stage jobs may be in flight.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ApplicationState::ScanningDocuments
                | ApplicationState::Analyzing
                | ApplicationState::MakingDecision
                | ApplicationState::DecisionCompleted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::Draft => "DRAFT",
            ApplicationState::FormSubmitted => "FORM_SUBMITTED",
            ApplicationState::DocumentsUploaded => "DOCUMENTS_UPLOADED",
            ApplicationState::ScanningDocuments => "SCANNING_DOCUMENTS",
            ApplicationState::OcrCompleted => "OCR_COMPLETED",
            ApplicationState::Analyzing => "ANALYZING",
            ApplicationState::AnalysisCompleted => "ANALYSIS_COMPLETED",
            ApplicationState::MakingDecision => "MAKING_DECISION",
            ApplicationState::DecisionCompleted => "DECISION_COMPLETED",
            ApplicationState::Approved => "APPROVED",
            ApplicationState::Rejected => "REJECTED",
            ApplicationState::NeedsReview => "NEEDS_REVIEW",
            ApplicationState::ProcessingFailed => "PROCESSING_FAILED",
            ApplicationState::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for ApplicationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ApplicationState::Draft),
            "FORM_SUBMITTED" => Ok(ApplicationState::FormSubmitted),
            "DOCUMENTS_UPLOADED" => Ok(ApplicationState::DocumentsUploaded),
            "SCANNING_DOCUMENTS" => Ok(ApplicationState::ScanningDocuments),
            "OCR_COMPLETED" => Ok(ApplicationState::OcrCompleted),
            "ANALYZING" => Ok(ApplicationState::Analyzing),
            "ANALYSIS_COMPLETED" => Ok(ApplicationState::AnalysisCompleted),
            "MAKING_DECISION" => Ok(ApplicationState::MakingDecision),
            "DECISION_COMPLETED" => Ok(ApplicationState::DecisionCompleted),
            "APPROVED" => Ok(ApplicationState::Approved),
            "REJECTED" => Ok(ApplicationState::Rejected),
            "NEEDS_REVIEW" => Ok(ApplicationState::NeedsReview),
            "PROCESSING_FAILED" => Ok(ApplicationState::ProcessingFailed),
            "CANCELLED" => Ok(ApplicationState::Cancelled),
            other => Err(format!("unknown application state: {other}")),
        }
    }
}

/// Kind of attached document. At most one per `(application, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    BankStatement,
    IdentityCard,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::BankStatement => "BANK_STATEMENT",
            DocumentKind::IdentityCard => "IDENTITY_CARD",
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BANK_STATEMENT" => Ok(DocumentKind::BankStatement),
            "IDENTITY_CARD" => Ok(DocumentKind::IdentityCard),
            other => Err(format!("unknown document kind: {other}")),
        }
    }
}

/// Per-stage processing status on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    /// Completed or failed; no further work will happen for this attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StageStatus::Pending),
            "RUNNING" => Ok(StageStatus::Running),
            "COMPLETED" => Ok(StageStatus::Completed),
            "FAILED" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

impl Default for StageStatus {
    fn default() -> Self {
        StageStatus::Pending
    }
}

/// Outcome of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "STARTED",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(StepStatus::Started),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            "SKIPPED" => Ok(StepStatus::Skipped),
            "CANCELLED" => Ok(StepStatus::Cancelled),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// Terminal verdict on an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    NeedsReview,
}

impl DecisionOutcome {
    /// The terminal application state this outcome maps to.
    pub fn terminal_state(&self) -> ApplicationState {
        match self {
            DecisionOutcome::Approved => ApplicationState::Approved,
            DecisionOutcome::Rejected => ApplicationState::Rejected,
            DecisionOutcome::NeedsReview => ApplicationState::NeedsReview,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approved => "APPROVED",
            DecisionOutcome::Rejected => "REJECTED",
            DecisionOutcome::NeedsReview => "NEEDS_REVIEW",
        }
    }
}

impl std::str::FromStr for DecisionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVED" => Ok(DecisionOutcome::Approved),
            "REJECTED" => Ok(DecisionOutcome::Rejected),
            "NEEDS_REVIEW" => Ok(DecisionOutcome::NeedsReview),
            other => Err(format!("unknown decision outcome: {other}")),
        }
    }
}

/// Applicant-provided form fields. All required once the form is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantForm {
    pub full_name: String,
    pub national_id: String,
    pub phone: String,
    pub email: String,
}

/// Short-lived exclusive claim on an application's advance operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The workflow subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub owner_id: OwnerId,
    pub form: ApplicantForm,
    pub state: ApplicationState,
    pub cancel_requested: bool,
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Whether `worker_id` currently holds a live lease on this application.
    pub fn lease_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .map(|l| l.worker_id == worker_id && !l.is_expired(now))
            .unwrap_or(false)
    }

    /// Whether any live lease exists. Expired leases are visible for
    /// diagnostics but ignored here.
    pub fn lease_live(&self, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .map(|l| !l.is_expired(now))
            .unwrap_or(false)
    }
}

/// One stage's record on a document. Result fields are write-once per attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub attempt: u32,
    pub confidence: Option<f64>,
    pub error_kind: Option<StageErrorKind>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A file attached to an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub application_id: ApplicationId,
    pub kind: DocumentKind,
    pub filename: String,
    pub byte_size: i64,
    pub content_type: String,
    pub storage_handle: String,
    pub ocr: StageRecord,
    pub ocr_text: Option<String>,
    pub ocr_pages: Option<u32>,
    pub extract: StageRecord,
    pub extracted_fields: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// OCR succeeded with usable text.
    pub fn has_ocr_text(&self) -> bool {
        self.ocr.status == StageStatus::Completed
            && self.ocr_text.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

/// Append-only audit record of state machine activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub application_id: ApplicationId,
    pub sequence: u32,
    pub step_name: String,
    pub from_state: ApplicationState,
    pub to_state: ApplicationState,
    pub status: StepStatus,
    pub message: String,
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub attempt: u32,
}

/// The terminal verdict. 0..1 per application; `benefit_amount` is in
/// currency minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub application_id: ApplicationId,
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    pub reasoning: String,
    pub benefit_amount: Option<i64>,
    pub decided_at: DateTime<Utc>,
}

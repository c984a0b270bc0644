//! Casework port traits.
//!
//! This crate defines the interfaces that adapters implement:
//! - ApplicationStore: durable persistence, the single source of truth
//! - JobQueue / JobSource: the background stage-job runtime
//! - OcrUpstream / ExtractUpstream / DecisionUpstream: model collaborators
//! - BlobStore: raw file storage
//! - IdentityProvider: bearer-token validation
//! - Clock: deterministic time

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cw_domain::{
    ApplicantForm, Application, ApplicationId, ApplicationState, Decision, Document, DocumentId,
    DocumentKind, JobId, Lease, ModelVerdict, OwnerId, Stage, StageErrorKind, StageStatus,
    StepStatus, WorkflowStep,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Clock
// ============================================================================

/// Clock port for deterministic time handling
pub trait Clock: Send + Sync {
    /// Get the current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Explicit cancellation signal threaded through executor calls.
///
/// Executors observe it at safe points: before upstream calls and at retry
/// boundaries. An in-flight upstream call is never interrupted; it runs to
/// completion or timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Application Store
// ============================================================================

/// Input for a new workflow step record. Sequence, id, and duration are
/// assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub step_name: String,
    pub status: StepStatus,
    pub message: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewStep {
    /// A completed step with empty payload.
    pub fn completed(step_name: impl Into<String>, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Completed,
            message: message.into(),
            payload: serde_json::Value::Null,
            attempt: 1,
            started_at: at,
            completed_at: Some(at),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Upload metadata for a document being attached.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub filename: String,
    pub byte_size: i64,
    pub content_type: String,
}

/// Result of a compare-and-set transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The transition was applied and journaled.
    Applied,
    /// The expected source state did not match; the caller must reload.
    Conflict { actual: ApplicationState },
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone)]
pub enum LeaseOutcome {
    /// The caller now holds the lease.
    Acquired(Lease),
    /// A live lease is held elsewhere.
    Held(Lease),
}

/// One stage-result write against a document. Idempotent per
/// `(document_id, stage, attempt)`: a write for an attempt that is already
/// recorded at a terminal status is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageUpdate {
    pub stage: Stage,
    pub attempt: u32,
    pub status: StageStatus,
    pub confidence: Option<f64>,
    pub text: Option<String>,
    pub pages: Option<u32>,
    pub fields: Option<serde_json::Value>,
    pub error_kind: Option<StageErrorKind>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fully materialized snapshot of an application and everything it owns.
#[derive(Debug, Clone)]
pub struct FullApplication {
    pub application: Application,
    pub documents: Vec<Document>,
    pub steps: Vec<WorkflowStep>,
    pub decision: Option<Decision>,
}

impl FullApplication {
    pub fn document(&self, kind: DocumentKind) -> Option<&Document> {
        self.documents.iter().find(|d| d.kind == kind)
    }
}

/// Application store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] cw_domain::DomainError),

    #[error("action {action} not allowed in state {state}")]
    InvalidState { state: String, action: String },

    #[error("a stage job is in flight for this application")]
    Busy,

    #[error("decision already recorded for {application_id}")]
    DecisionExists { application_id: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Durable persistence of applications, documents, workflow steps, and
/// decisions. The only mutator of application state; every write is atomic
/// per call.
pub trait ApplicationStore: Send + Sync {
    /// Insert a new application in `DRAFT` and journal the initial step.
    fn create_application(
        &self,
        owner_id: &OwnerId,
        form: &ApplicantForm,
        step: NewStep,
    ) -> impl Future<Output = Result<Application, StoreError>> + Send;

    /// Attach (or, in permitted states, replace) a document of the given
    /// kind. Enforces kind uniqueness per application.
    fn attach_document(
        &self,
        application_id: &ApplicationId,
        kind: DocumentKind,
        storage_handle: &str,
        meta: DocumentMeta,
    ) -> impl Future<Output = Result<Document, StoreError>> + Send;

    /// Atomic compare-and-set on the application state. Validates the
    /// transition, journals the step, and updates lifecycle timestamps.
    fn transition(
        &self,
        application_id: &ApplicationId,
        expected_from: ApplicationState,
        to: ApplicationState,
        step: NewStep,
    ) -> impl Future<Output = Result<TransitionOutcome, StoreError>> + Send;

    /// Journal a step without a state change (diagnostics, contention).
    fn append_step(
        &self,
        application_id: &ApplicationId,
        step: NewStep,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set the advance lease if it is free or expired.
    fn acquire_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<LeaseOutcome, StoreError>> + Send;

    /// Clear the lease iff held by `worker_id`.
    fn release_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mark the application as cancel-requested. Observed by workers at safe
    /// points.
    fn request_cancel(
        &self,
        application_id: &ApplicationId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write stage-result fields on a document. Returns `false` when the
    /// write was discarded as a stale or duplicate attempt.
    fn update_document_stage(
        &self,
        document_id: &DocumentId,
        update: StageUpdate,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Record the 0..1 decision row. Only valid in `MAKING_DECISION`.
    fn record_decision(
        &self,
        application_id: &ApplicationId,
        decision: &Decision,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Snapshot read of the application row.
    fn load(
        &self,
        application_id: &ApplicationId,
    ) -> impl Future<Output = Result<Application, StoreError>> + Send;

    /// Snapshot read of the application and all owned records.
    fn load_full(
        &self,
        application_id: &ApplicationId,
    ) -> impl Future<Output = Result<FullApplication, StoreError>> + Send;

    /// Administrative reset into `DRAFT` or `FORM_SUBMITTED`. Clears stage
    /// results, the decision, and the cancel flag.
    fn reset(
        &self,
        application_id: &ApplicationId,
        to: ApplicationState,
        step: NewStep,
    ) -> impl Future<Output = Result<Application, StoreError>> + Send;
}

// ============================================================================
// Job Queue
// ============================================================================

/// A stage job as carried on the queue. Payloads are identifiers plus
/// attempt metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageJob {
    pub job_id: JobId,
    pub application_id: ApplicationId,
    pub stage: Stage,
    pub document_id: Option<DocumentId>,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl StageJob {
    /// The job for the next retry attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            job_id: JobId::new(),
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Job queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("publish error: {message}")]
    Publish { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Producer side of the background job runtime. Delivery is at-least-once;
/// handlers stay idempotent through the store's compare-and-set and
/// per-attempt keying.
pub trait JobQueue: Send + Sync {
    /// Enqueue a stage job, optionally delayed (retry backoff).
    fn enqueue(
        &self,
        job: StageJob,
        delay: Option<Duration>,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Park a job that will never be retried, with a reason.
    fn dead_letter(
        &self,
        job: StageJob,
        reason: &str,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// Consumer side of the job runtime. `None` means the queue is closed.
pub trait JobSource: Send {
    fn next_job(&mut self) -> impl Future<Output = Result<Option<StageJob>, QueueError>> + Send;
}

// ============================================================================
// Blob Storage
// ============================================================================

/// Metadata stored alongside an uploaded blob.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub filename: String,
    pub content_type: String,
}

/// Blob store errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("blob not found: {handle}")]
    NotFound { handle: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

/// Raw file storage collaborator. The core only ever holds opaque handles.
pub trait BlobStore: Send + Sync {
    /// Store a blob, returning its opaque storage handle.
    fn put(
        &self,
        content: bytes::Bytes,
        meta: &BlobMeta,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    /// Fetch a blob by handle.
    fn open(
        &self,
        handle: &str,
    ) -> impl Future<Output = Result<bytes::Bytes, StorageError>> + Send;
}

// ============================================================================
// Upstream Collaborators
// ============================================================================

/// Upstream collaborator errors, pre-classification.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {message}")]
    Unavailable { message: String },

    #[error("unsupported format: {message}")]
    Unsupported { message: String },

    #[error("unparseable upstream output: {message}")]
    Parse { message: String },

    #[error("transient upstream error: {message}")]
    Transient { message: String },

    #[error("cancelled")]
    Cancelled,
}

/// OCR result from the text-extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub confidence: f64,
    pub pages: u32,
}

/// OCR engine collaborator.
pub trait OcrUpstream: Send + Sync {
    fn extract_text(
        &self,
        content: bytes::Bytes,
        content_type: &str,
        cancel: &CancelSignal,
    ) -> impl Future<Output = Result<OcrOutput, UpstreamError>> + Send;
}

/// Multimodal structured-extraction collaborator. Returns a kind-specific
/// field map.
pub trait ExtractUpstream: Send + Sync {
    fn extract_structured(
        &self,
        kind: DocumentKind,
        content: bytes::Bytes,
        ocr_text: &str,
        cancel: &CancelSignal,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;
}

/// Decision model collaborator.
pub trait DecisionUpstream: Send + Sync {
    fn decide(
        &self,
        inputs: &serde_json::Value,
        cancel: &CancelSignal,
    ) -> impl Future<Output = Result<ModelVerdict, UpstreamError>> + Send;
}

// ============================================================================
// Identity
// ============================================================================

/// Identity provider errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("token expired")]
    TokenExpired,

    #[error("provider error: {message}")]
    Provider { message: String },
}

/// Authentication collaborator: validates a bearer credential and derives
/// the owner identity.
pub trait IdentityProvider: Send + Sync {
    fn validate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<OwnerId, IdentityError>> + Send;
}

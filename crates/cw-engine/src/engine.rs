//! Workflow engine: the scheduler.
//!
//! Entry points are invoked synchronously by HTTP handlers (user actions)
//! and by job handlers (stage completions). The engine owns the advance
//! algorithm: under a per-application lease it records stage results,
//! evaluates the state machine against observed per-document statuses,
//! applies compare-and-set transitions, and enqueues follow-up stage jobs
//! until no rule fires.

use std::sync::Arc;
use std::time::Duration;

use cw_domain::{
    policy, validate_form, ApplicantFormInput, Application, ApplicationId, ApplicationState,
    Decision, Document, DocumentId, DocumentKind, JobId, ModelVerdict, OwnerId, Stage,
    StageFailure, StageStatus, StepStatus,
};
use cw_ports::{
    ApplicationStore, Clock, DocumentMeta, FullApplication, JobQueue, LeaseOutcome, NewStep,
    OcrOutput, StageJob, StageUpdate, TransitionOutcome,
};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelRegistry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executors::ExtractOutput;

/// Advance rounds before the engine assumes it is not quiescing.
const MAX_ADVANCE_ROUNDS: usize = 8;

/// Budget for the advance critical section; longer indicates store
/// contention and is surfaced as a diagnostic.
const ADVANCE_BUDGET: Duration = Duration::from_secs(5);

pub mod step_names {
    pub const CREATE_APPLICATION: &str = "CREATE_APPLICATION";
    pub const SUBMIT_FORM: &str = "SUBMIT_FORM";
    pub const DOCUMENTS_UPLOADED: &str = "DOCUMENTS_UPLOADED";
    pub const BEGIN_PROCESSING: &str = "BEGIN_PROCESSING";
    pub const OCR_RESULTS: &str = "OCR_RESULTS";
    pub const START_ANALYSIS: &str = "START_ANALYSIS";
    pub const ANALYSIS_RESULTS: &str = "ANALYSIS_RESULTS";
    pub const START_DECISION: &str = "START_DECISION";
    pub const DECIDE: &str = "DECIDE";
    pub const DECISION_FAILED: &str = "DECISION_FAILED";
    pub const POLICY_DISAGREEMENT: &str = "POLICY_DISAGREEMENT";
    pub const FINALIZE: &str = "FINALIZE";
    pub const CANCEL: &str = "CANCEL";
    pub const ADVANCE_CONTENDED: &str = "ADVANCE_CONTENDED";
    pub const RESET: &str = "RESET";
}

/// Result of one finished stage execution.
#[derive(Debug, Clone)]
pub enum StageResult {
    Ocr(OcrOutput),
    Extract(ExtractOutput),
    Decide(ModelVerdict),
}

/// What the worker reports back for a stage job.
pub type StageOutcome = Result<StageResult, StageFailure>;

/// A document to attach, after the API has stored the blob.
#[derive(Debug, Clone)]
pub struct DocumentSpec {
    pub kind: DocumentKind,
    pub storage_handle: String,
    pub meta: DocumentMeta,
}

/// Response of [`WorkflowEngine::begin_processing`].
#[derive(Debug, Clone)]
pub struct ProcessingStarted {
    pub application: Application,
    pub job_id: JobId,
    pub estimated_completion_seconds: u64,
}

/// The scheduler. Generic over the store and queue ports; upstream I/O is
/// performed by the worker before results re-enter here.
pub struct WorkflowEngine<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    cancellations: CancelRegistry,
    advancer_id: String,
}

impl<S: ApplicationStore, Q: JobQueue> WorkflowEngine<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            store,
            queue,
            clock,
            config,
            cancellations: CancelRegistry::new(),
            advancer_id: format!("advancer-{}-{}", host, ulid::Ulid::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancellations(&self) -> &CancelRegistry {
        &self.cancellations
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub fn queue(&self) -> Arc<Q> {
        self.queue.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Validate the form and create the application, leaving it in
    /// `FORM_SUBMITTED`.
    #[instrument(skip(self, input), fields(owner_id = %owner.as_str()))]
    pub async fn start_application(
        &self,
        owner: &OwnerId,
        input: &ApplicantFormInput,
    ) -> Result<Application, EngineError> {
        let form = validate_form(input).map_err(EngineError::InvalidForm)?;

        let now = self.clock.now();
        let app = self
            .store
            .create_application(
                owner,
                &form,
                NewStep::completed(step_names::CREATE_APPLICATION, "application created", now),
            )
            .await?;

        let outcome = self
            .store
            .transition(
                &app.id,
                ApplicationState::Draft,
                ApplicationState::FormSubmitted,
                NewStep::completed(
                    step_names::SUBMIT_FORM,
                    "form validated and submitted",
                    self.clock.now(),
                ),
            )
            .await?;
        if let TransitionOutcome::Conflict { actual } = outcome {
            warn!(actual = actual.as_str(), "fresh application contended");
        }

        info!(application_id = %app.id.as_str(), "application started");
        Ok(self.store.load(&app.id).await?)
    }

    /// Attach uploaded documents; transitions to `DOCUMENTS_UPLOADED` once
    /// both kinds are present.
    #[instrument(skip(self, specs), fields(application_id = %application_id.as_str()))]
    pub async fn upload_documents(
        &self,
        owner: &OwnerId,
        application_id: &ApplicationId,
        specs: Vec<DocumentSpec>,
    ) -> Result<(Vec<Document>, Application), EngineError> {
        let app = self.load_owned(owner, application_id).await?;
        if !matches!(
            app.state,
            ApplicationState::FormSubmitted
                | ApplicationState::DocumentsUploaded
                | ApplicationState::ProcessingFailed
        ) {
            return Err(EngineError::InvalidStateForAction {
                state: app.state.as_str().to_string(),
                action: "upload_documents".to_string(),
            });
        }

        let mut documents = Vec::with_capacity(specs.len());
        for spec in specs {
            let doc = self
                .store
                .attach_document(application_id, spec.kind, &spec.storage_handle, spec.meta)
                .await?;
            documents.push(doc);
        }

        let full = self.store.load_full(application_id).await?;
        let have_both = full.document(DocumentKind::BankStatement).is_some()
            && full.document(DocumentKind::IdentityCard).is_some();
        if full.application.state == ApplicationState::FormSubmitted && have_both {
            self.store
                .transition(
                    application_id,
                    ApplicationState::FormSubmitted,
                    ApplicationState::DocumentsUploaded,
                    NewStep::completed(
                        step_names::DOCUMENTS_UPLOADED,
                        "both documents attached",
                        self.clock.now(),
                    ),
                )
                .await?;
        }

        Ok((documents, self.store.load(application_id).await?))
    }

    /// Start (or, with `force_retry`, restart) asynchronous processing.
    #[instrument(skip(self), fields(application_id = %application_id.as_str()))]
    pub async fn begin_processing(
        &self,
        owner: &OwnerId,
        application_id: &ApplicationId,
        force_retry: bool,
    ) -> Result<ProcessingStarted, EngineError> {
        self.load_owned(owner, application_id).await?;
        let full = self.store.load_full(application_id).await?;
        let state = full.application.state;

        if state.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        if state.is_terminal() {
            return Err(EngineError::Terminal {
                state: state.as_str().to_string(),
            });
        }
        let expected = match state {
            ApplicationState::DocumentsUploaded => state,
            ApplicationState::ProcessingFailed if force_retry => state,
            other => {
                return Err(EngineError::InvalidStateForAction {
                    state: other.as_str().to_string(),
                    action: "process".to_string(),
                })
            }
        };
        if full.document(DocumentKind::BankStatement).is_none()
            || full.document(DocumentKind::IdentityCard).is_none()
        {
            return Err(EngineError::InvalidStateForAction {
                state: state.as_str().to_string(),
                action: "process".to_string(),
            });
        }

        let run = full
            .steps
            .iter()
            .filter(|s| s.step_name == step_names::BEGIN_PROCESSING)
            .count() as u32
            + 1;
        let now = self.clock.now();
        let message = if force_retry {
            "processing restarted by applicant"
        } else {
            "processing started"
        };
        let step =
            NewStep::completed(step_names::BEGIN_PROCESSING, message, now).with_attempt(run);

        match self
            .store
            .transition(application_id, expected, ApplicationState::ScanningDocuments, step)
            .await?
        {
            TransitionOutcome::Applied => {}
            TransitionOutcome::Conflict { .. } => return Err(EngineError::AlreadyRunning),
        }

        let mut first_job = None;
        let mut pending = 0u64;
        for doc in &full.documents {
            if doc.ocr.status == StageStatus::Completed {
                continue;
            }
            let attempt = doc.ocr.attempt + 1;
            self.store
                .update_document_stage(&doc.id, running_update(Stage::Ocr, attempt))
                .await?;
            let job = StageJob {
                job_id: JobId::new(),
                application_id: application_id.clone(),
                stage: Stage::Ocr,
                document_id: Some(doc.id.clone()),
                attempt,
                max_attempts: self.config.max_attempts_per_stage,
            };
            if first_job.is_none() {
                first_job = Some(job.job_id.clone());
            }
            self.queue.enqueue(job, None).await?;
            pending += 1;
        }

        // A retry after a later-stage failure may have nothing left to scan;
        // nudge the advance so the workflow resumes from the completed work.
        if pending == 0 {
            self.advance(application_id).await?;
        }

        info!(jobs = pending, "processing dispatched");
        Ok(ProcessingStarted {
            application: self.store.load(application_id).await?,
            job_id: first_job.unwrap_or_default(),
            estimated_completion_seconds: self.estimate_completion(pending),
        })
    }

    /// Cancel the workflow. Running applications are flagged and transition
    /// at the next safe point; idle ones transition immediately.
    #[instrument(skip(self), fields(application_id = %application_id.as_str()))]
    pub async fn cancel(
        &self,
        owner: &OwnerId,
        application_id: &ApplicationId,
    ) -> Result<Application, EngineError> {
        let app = self.load_owned(owner, application_id).await?;
        if app.state.is_terminal() {
            return Err(EngineError::Terminal {
                state: app.state.as_str().to_string(),
            });
        }

        if app.state.is_running() {
            self.store.request_cancel(application_id).await?;
            self.cancellations.cancel(application_id);
            info!("cancellation requested, applying at next safe point");
        } else {
            let step = NewStep::completed(
                step_names::CANCEL,
                "cancelled by applicant",
                self.clock.now(),
            )
            .with_status(StepStatus::Cancelled);
            self.store
                .transition(application_id, app.state, ApplicationState::Cancelled, step)
                .await?;
            self.cancellations.forget(application_id);
        }

        Ok(self.store.load(application_id).await?)
    }

    /// Progress payload for the polling UI.
    pub async fn progress(
        &self,
        owner: &OwnerId,
        application_id: &ApplicationId,
    ) -> Result<crate::progress::ProgressReport, EngineError> {
        self.load_owned(owner, application_id).await?;
        let full = self.store.load_full(application_id).await?;
        Ok(crate::progress::progress_report(&full, self.clock.now()))
    }

    /// Administrative reset into `DRAFT` or `FORM_SUBMITTED`.
    #[instrument(skip(self), fields(application_id = %application_id.as_str()))]
    pub async fn reset(
        &self,
        application_id: &ApplicationId,
        to: ApplicationState,
    ) -> Result<Application, EngineError> {
        let step = NewStep::completed(
            step_names::RESET,
            format!("administratively reset to {}", to.as_str()),
            self.clock.now(),
        );
        let app = self.store.reset(application_id, to, step).await?;
        self.cancellations.forget(application_id);
        Ok(app)
    }

    // ========================================================================
    // Advance
    // ========================================================================

    /// Record a stage result and advance the workflow. This is the stage
    /// completion callback; it is re-entrant and idempotent.
    #[instrument(
        skip(self, outcome),
        fields(application_id = %application_id.as_str(), stage = stage.as_str(), attempt)
    )]
    pub async fn handle_stage_completion(
        &self,
        application_id: &ApplicationId,
        stage: Stage,
        document_id: Option<&DocumentId>,
        attempt: u32,
        outcome: StageOutcome,
    ) -> Result<(), EngineError> {
        let holder = self.advance_token();
        match self
            .store
            .acquire_lease(application_id, &holder, self.config.lease_ttl())
            .await?
        {
            LeaseOutcome::Held(lease) => {
                // The leaseholder will observe this on its next round.
                debug!(holder = %lease.worker_id, "lease held elsewhere, persisting result only");
                return self
                    .record_stage_outcome(application_id, stage, document_id, attempt, &outcome)
                    .await;
            }
            LeaseOutcome::Acquired(_) => {}
        }

        let entered = std::time::Instant::now();
        let result = async {
            self.record_stage_outcome(application_id, stage, document_id, attempt, &outcome)
                .await?;
            self.advance_locked(application_id).await
        }
        .await;
        let released = self.store.release_lease(application_id, &holder).await;

        if entered.elapsed() > ADVANCE_BUDGET {
            warn!(
                elapsed_ms = entered.elapsed().as_millis() as u64,
                "advance critical section exceeded budget"
            );
        }

        result?;
        released?;
        Ok(())
    }

    /// Advance without a result to record.
    pub async fn advance(&self, application_id: &ApplicationId) -> Result<(), EngineError> {
        let holder = self.advance_token();
        match self
            .store
            .acquire_lease(application_id, &holder, self.config.lease_ttl())
            .await?
        {
            LeaseOutcome::Held(_) => Ok(()),
            LeaseOutcome::Acquired(_) => {
                let result = self.advance_locked(application_id).await;
                let released = self.store.release_lease(application_id, &holder).await;
                result?;
                released?;
                Ok(())
            }
        }
    }

    /// Lease holder id for one advance. Per-call so that concurrent advances
    /// within one process exclude each other like cross-process ones do.
    fn advance_token(&self) -> String {
        format!("{}#{}", self.advancer_id, ulid::Ulid::new())
    }

    /// Evaluate-and-apply until quiescent. Caller holds the lease.
    async fn advance_locked(&self, application_id: &ApplicationId) -> Result<(), EngineError> {
        for _ in 0..MAX_ADVANCE_ROUNDS {
            let full = self.store.load_full(application_id).await?;
            if !self.apply_next(&full).await? {
                return Ok(());
            }
        }
        warn!("advance did not quiesce within {MAX_ADVANCE_ROUNDS} rounds");
        Ok(())
    }

    /// Apply at most one transition for the observed snapshot. Returns
    /// whether anything changed.
    async fn apply_next(&self, full: &FullApplication) -> Result<bool, EngineError> {
        let app = &full.application;
        let id = &app.id;
        let now = self.clock.now();

        if app.state.is_terminal() {
            self.cancellations.forget(id);
            return Ok(false);
        }

        if app.cancel_requested {
            let step = NewStep::completed(step_names::CANCEL, "cancellation acknowledged", now)
                .with_status(StepStatus::Cancelled);
            return self
                .try_transition(id, app.state, ApplicationState::Cancelled, step)
                .await;
        }

        match app.state {
            ApplicationState::ScanningDocuments => {
                if full.documents.iter().any(|d| !d.ocr.status.is_terminal()) {
                    return Ok(false);
                }
                let succeeded = full.documents.iter().filter(|d| d.has_ocr_text()).count();
                let failed = full.documents.len() - succeeded;
                if succeeded == 0 {
                    let step = NewStep::completed(
                        step_names::OCR_RESULTS,
                        "text extraction failed for every document",
                        now,
                    )
                    .with_status(StepStatus::Failed)
                    .with_payload(serde_json::json!({ "reason": "ALL_OCR_FAILED" }));
                    self.try_transition(id, app.state, ApplicationState::ProcessingFailed, step)
                        .await
                } else {
                    let step = NewStep::completed(
                        step_names::OCR_RESULTS,
                        format!("text extracted from {succeeded} of {} documents", full.documents.len()),
                        now,
                    )
                    .with_payload(serde_json::json!({
                        "ocr_succeeded": succeeded,
                        "ocr_failed": failed,
                        "partial_success": failed > 0,
                    }));
                    self.try_transition(id, app.state, ApplicationState::OcrCompleted, step)
                        .await
                }
            }

            ApplicationState::OcrCompleted => {
                let ready: Vec<&Document> =
                    full.documents.iter().filter(|d| d.has_ocr_text()).collect();
                if ready.is_empty() {
                    let step = NewStep::completed(
                        step_names::START_ANALYSIS,
                        "no readable documents to analyze",
                        now,
                    )
                    .with_status(StepStatus::Skipped);
                    return self
                        .try_transition(id, app.state, ApplicationState::NeedsReview, step)
                        .await;
                }

                let partial = ready.len() < full.documents.len();
                let step = NewStep::completed(
                    step_names::START_ANALYSIS,
                    format!("analyzing {} documents", ready.len()),
                    now,
                )
                .with_payload(serde_json::json!({ "partial_success": partial }));
                if !self
                    .try_transition(id, app.state, ApplicationState::Analyzing, step)
                    .await?
                {
                    return Ok(false);
                }

                for doc in ready {
                    if doc.extract.status == StageStatus::Completed {
                        continue;
                    }
                    let attempt = doc.extract.attempt + 1;
                    self.store
                        .update_document_stage(&doc.id, running_update(Stage::Extract, attempt))
                        .await?;
                    self.queue
                        .enqueue(
                            StageJob {
                                job_id: JobId::new(),
                                application_id: id.clone(),
                                stage: Stage::Extract,
                                document_id: Some(doc.id.clone()),
                                attempt,
                                max_attempts: self.config.max_attempts_per_stage,
                            },
                            None,
                        )
                        .await?;
                }
                Ok(true)
            }

            ApplicationState::Analyzing => {
                let enqueued: Vec<&Document> =
                    full.documents.iter().filter(|d| d.has_ocr_text()).collect();
                if enqueued.iter().any(|d| !d.extract.status.is_terminal()) {
                    return Ok(false);
                }
                let succeeded = enqueued
                    .iter()
                    .filter(|d| d.extract.status == StageStatus::Completed)
                    .count();
                let partial = enqueued.len() < full.documents.len();

                if succeeded > 0 {
                    let step = NewStep::completed(
                        step_names::ANALYSIS_RESULTS,
                        format!("structured extraction succeeded for {succeeded} documents"),
                        now,
                    )
                    .with_payload(serde_json::json!({
                        "extract_succeeded": succeeded,
                        "extract_failed": enqueued.len() - succeeded,
                        "partial_success": partial,
                    }));
                    self.try_transition(id, app.state, ApplicationState::AnalysisCompleted, step)
                        .await
                } else if partial {
                    let step = NewStep::completed(
                        step_names::ANALYSIS_RESULTS,
                        "all extractions failed in partial-success mode",
                        now,
                    )
                    .with_payload(serde_json::json!({ "partial_success": true }));
                    self.try_transition(id, app.state, ApplicationState::NeedsReview, step)
                        .await
                } else {
                    let step = NewStep::completed(
                        step_names::ANALYSIS_RESULTS,
                        "structured extraction failed for every document",
                        now,
                    )
                    .with_status(StepStatus::Failed)
                    .with_payload(serde_json::json!({ "reason": "ALL_EXTRACT_FAILED" }));
                    self.try_transition(id, app.state, ApplicationState::ProcessingFailed, step)
                        .await
                }
            }

            ApplicationState::AnalysisCompleted => {
                let attempt = full
                    .steps
                    .iter()
                    .filter(|s| s.step_name == step_names::START_DECISION)
                    .count() as u32
                    + 1;
                let step = NewStep::completed(step_names::START_DECISION, "deciding eligibility", now)
                    .with_attempt(attempt);
                if !self
                    .try_transition(id, app.state, ApplicationState::MakingDecision, step)
                    .await?
                {
                    return Ok(false);
                }
                self.queue
                    .enqueue(
                        StageJob {
                            job_id: JobId::new(),
                            application_id: id.clone(),
                            stage: Stage::Decide,
                            document_id: None,
                            attempt: 1,
                            max_attempts: self.config.max_attempts_per_stage,
                        },
                        None,
                    )
                    .await?;
                Ok(true)
            }

            ApplicationState::MakingDecision => {
                if let Some(decision) = &full.decision {
                    let step = NewStep::completed(
                        step_names::DECIDE,
                        format!("decision recorded: {}", decision.outcome.as_str()),
                        now,
                    )
                    .with_payload(serde_json::json!({
                        "outcome": decision.outcome,
                        "confidence": decision.confidence,
                        "benefit_amount": decision.benefit_amount,
                    }));
                    return self
                        .try_transition(id, app.state, ApplicationState::DecisionCompleted, step)
                        .await;
                }
                if decision_failed_since_entry(full) {
                    let step = NewStep::completed(
                        step_names::DECIDE,
                        "decision stage failed",
                        now,
                    )
                    .with_status(StepStatus::Failed)
                    .with_payload(serde_json::json!({ "reason": "DECISION_FAILED" }));
                    return self
                        .try_transition(id, app.state, ApplicationState::ProcessingFailed, step)
                        .await;
                }
                Ok(false)
            }

            ApplicationState::DecisionCompleted => {
                let Some(decision) = &full.decision else {
                    warn!("decision missing in DECISION_COMPLETED");
                    return Ok(false);
                };
                let terminal = decision.outcome.terminal_state();
                let step = NewStep::completed(
                    step_names::FINALIZE,
                    format!("application {}", terminal.as_str()),
                    now,
                );
                let applied = self.try_transition(id, app.state, terminal, step).await?;
                if applied {
                    self.cancellations.forget(id);
                }
                Ok(applied)
            }

            // Nothing advances automatically from these.
            ApplicationState::Draft
            | ApplicationState::FormSubmitted
            | ApplicationState::DocumentsUploaded
            | ApplicationState::ProcessingFailed => Ok(false),

            ApplicationState::Approved
            | ApplicationState::Rejected
            | ApplicationState::NeedsReview
            | ApplicationState::Cancelled => Ok(false),
        }
    }

    /// Compare-and-set with the reload-and-retry-once contention policy.
    async fn try_transition(
        &self,
        application_id: &ApplicationId,
        from: ApplicationState,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<bool, EngineError> {
        match self
            .store
            .transition(application_id, from, to, step.clone())
            .await?
        {
            TransitionOutcome::Applied => Ok(true),
            TransitionOutcome::Conflict { actual } => {
                debug!(
                    expected = from.as_str(),
                    actual = actual.as_str(),
                    "transition contended, reloading"
                );
                let reloaded = self.store.load(application_id).await?;
                if reloaded.state != from {
                    // Someone else advanced; let the caller re-evaluate.
                    return Ok(true);
                }
                match self
                    .store
                    .transition(application_id, from, to, step)
                    .await?
                {
                    TransitionOutcome::Applied => Ok(true),
                    TransitionOutcome::Conflict { actual } => {
                        let note = NewStep::completed(
                            step_names::ADVANCE_CONTENDED,
                            "gave up after contended transition",
                            self.clock.now(),
                        )
                        .with_status(StepStatus::Skipped)
                        .with_payload(serde_json::json!({
                            "expected": from.as_str(),
                            "actual": actual.as_str(),
                            "target": to.as_str(),
                        }));
                        self.store.append_step(application_id, note).await?;
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Persist one stage outcome. Safe to call without the lease; writes are
    /// idempotent per `(document, stage, attempt)`.
    async fn record_stage_outcome(
        &self,
        application_id: &ApplicationId,
        stage: Stage,
        document_id: Option<&DocumentId>,
        attempt: u32,
        outcome: &StageOutcome,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        match (stage, document_id) {
            (Stage::Ocr, Some(doc_id)) => {
                let update = match outcome {
                    Ok(StageResult::Ocr(output)) => StageUpdate {
                        stage,
                        attempt,
                        status: StageStatus::Completed,
                        confidence: Some(output.confidence),
                        text: Some(output.text.clone()),
                        pages: Some(output.pages),
                        fields: None,
                        error_kind: None,
                        error_message: None,
                        completed_at: Some(now),
                    },
                    Err(failure) => failed_update(stage, attempt, failure, now),
                    Ok(other) => {
                        warn!(?other, "mismatched result for ocr stage");
                        return Ok(());
                    }
                };
                if !self.store.update_document_stage(doc_id, update).await? {
                    debug!("stale or duplicate ocr result discarded");
                }
                Ok(())
            }

            (Stage::Extract, Some(doc_id)) => {
                let update = match outcome {
                    Ok(StageResult::Extract(output)) => StageUpdate {
                        stage,
                        attempt,
                        status: StageStatus::Completed,
                        confidence: Some(output.confidence),
                        text: None,
                        pages: None,
                        fields: Some(output.fields.clone()),
                        error_kind: None,
                        error_message: None,
                        completed_at: Some(now),
                    },
                    Err(failure) => failed_update(stage, attempt, failure, now),
                    Ok(other) => {
                        warn!(?other, "mismatched result for extract stage");
                        return Ok(());
                    }
                };
                if !self.store.update_document_stage(doc_id, update).await? {
                    debug!("stale or duplicate extraction result discarded");
                }
                Ok(())
            }

            (Stage::Decide, _) => {
                self.record_decide_outcome(application_id, attempt, outcome, now)
                    .await
            }

            (stage, None) => {
                warn!(stage = stage.as_str(), "stage completion without document id");
                Ok(())
            }
        }
    }

    async fn record_decide_outcome(
        &self,
        application_id: &ApplicationId,
        attempt: u32,
        outcome: &StageOutcome,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), EngineError> {
        let full = self.store.load_full(application_id).await?;
        match outcome {
            Ok(StageResult::Decide(verdict)) => {
                if full.decision.is_some() {
                    debug!("decision already recorded, duplicate callback ignored");
                    return Ok(());
                }
                if full.application.state != ApplicationState::MakingDecision {
                    // Typically a late result after cancellation; journal it
                    // for diagnostics without driving a transition.
                    let note = NewStep::completed(
                        step_names::DECIDE,
                        "late decision result ignored",
                        now,
                    )
                    .with_status(StepStatus::Skipped)
                    .with_payload(serde_json::json!({ "verdict": verdict }))
                    .with_attempt(attempt);
                    self.store.append_step(application_id, note).await?;
                    return Ok(());
                }

                let bank = full
                    .document(DocumentKind::BankStatement)
                    .and_then(|d| d.extracted_fields.clone());
                let id_fields = full
                    .document(DocumentKind::IdentityCard)
                    .and_then(|d| d.extracted_fields.clone());
                let inputs = policy::numeric_inputs_from_extracts(bank.as_ref(), id_fields.as_ref());
                let fused = policy::evaluate(&inputs, Some(verdict), &self.config.eligibility);

                let decision = Decision {
                    application_id: application_id.clone(),
                    outcome: fused.outcome,
                    confidence: fused.confidence,
                    reasoning: fused.reasoning.clone(),
                    benefit_amount: fused.benefit_amount,
                    decided_at: now,
                };
                match self.store.record_decision(application_id, &decision).await {
                    Ok(()) => {}
                    Err(cw_ports::StoreError::DecisionExists { .. }) => return Ok(()),
                    Err(e) => return Err(e.into()),
                }

                if let Some(disagreement) = &fused.disagreement {
                    let note = NewStep::completed(
                        step_names::POLICY_DISAGREEMENT,
                        "numeric rule overrode the model verdict",
                        now,
                    )
                    .with_status(StepStatus::Skipped)
                    .with_payload(serde_json::json!(disagreement));
                    self.store.append_step(application_id, note).await?;
                }
                Ok(())
            }

            Err(failure) => {
                let since_entry = decision_entry_index(&full).unwrap_or(0);
                let duplicate = full.steps[since_entry..].iter().any(|s| {
                    s.step_name == step_names::DECISION_FAILED && s.attempt == attempt
                });
                if duplicate {
                    return Ok(());
                }
                let note = NewStep::completed(step_names::DECISION_FAILED, failure.message.clone(), now)
                    .with_status(StepStatus::Failed)
                    .with_payload(serde_json::json!({ "kind": failure.kind }))
                    .with_attempt(attempt);
                self.store.append_step(application_id, note).await?;
                Ok(())
            }

            Ok(other) => {
                warn!(?other, "mismatched result for decide stage");
                Ok(())
            }
        }
    }

    fn estimate_completion(&self, pending_docs: u64) -> u64 {
        pending_docs.max(1) * self.config.ocr_timeout_s
            + self.config.extract_timeout_s
            + self.config.decision_timeout_s
    }

    async fn load_owned(
        &self,
        owner: &OwnerId,
        application_id: &ApplicationId,
    ) -> Result<Application, EngineError> {
        let app = self.store.load(application_id).await?;
        if &app.owner_id != owner {
            // Foreign applications are indistinguishable from absent ones.
            return Err(EngineError::Store(cw_ports::StoreError::NotFound {
                resource: "application",
                id: application_id.as_str().to_string(),
            }));
        }
        Ok(app)
    }
}

/// Index of the step that last moved the workflow into `MAKING_DECISION`.
fn decision_entry_index(full: &FullApplication) -> Option<usize> {
    full.steps.iter().rposition(|s| {
        s.to_state == ApplicationState::MakingDecision
            && s.from_state != ApplicationState::MakingDecision
    })
}

/// Whether a decide attempt failed after the workflow last entered
/// `MAKING_DECISION`.
fn decision_failed_since_entry(full: &FullApplication) -> bool {
    let Some(entry) = decision_entry_index(full) else {
        return false;
    };
    full.steps[entry..]
        .iter()
        .any(|s| s.step_name == step_names::DECISION_FAILED)
}

pub(crate) fn running_update(stage: Stage, attempt: u32) -> StageUpdate {
    StageUpdate {
        stage,
        attempt,
        status: StageStatus::Running,
        confidence: None,
        text: None,
        pages: None,
        fields: None,
        error_kind: None,
        error_message: None,
        completed_at: None,
    }
}

fn failed_update(
    stage: Stage,
    attempt: u32,
    failure: &StageFailure,
    now: chrono::DateTime<chrono::Utc>,
) -> StageUpdate {
    StageUpdate {
        stage,
        attempt,
        status: StageStatus::Failed,
        confidence: None,
        text: None,
        pages: None,
        fields: None,
        error_kind: Some(failure.kind),
        error_message: Some(failure.message.clone()),
        completed_at: Some(now),
    }
}

//! In-memory adapters.
//!
//! Full-fidelity implementations of the store, queue, blob, and clock ports
//! over process memory. They carry the same semantics as the production
//! adapters (compare-and-set, lease expiry, per-attempt idempotency) and
//! back the engine and API test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cw_domain::{
    ApplicantForm, Application, ApplicationId, ApplicationState, Decision, Document, DocumentId,
    DocumentKind, Lease, OwnerId, StageRecord, StageStatus, StepId, WorkflowStep,
    WorkflowStateMachine,
};
use cw_ports::{
    ApplicationStore, BlobMeta, BlobStore, Clock, DocumentMeta, FullApplication, JobQueue,
    JobSource, LeaseOutcome, NewStep, QueueError, StageJob, StageUpdate, StorageError, StoreError,
    TransitionOutcome,
};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

// ============================================================================
// Clock
// ============================================================================

/// Clock whose time only moves when a test advances it.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Application Store
// ============================================================================

#[derive(Default)]
struct StoreInner {
    applications: HashMap<String, Application>,
    documents: HashMap<String, Document>,
    steps: HashMap<String, Vec<WorkflowStep>>,
    decisions: HashMap<String, Decision>,
}

/// In-memory [`ApplicationStore`].
pub struct MemoryApplicationStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
}

impl MemoryApplicationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn materialize_step(
    application_id: &ApplicationId,
    sequence: u32,
    from: ApplicationState,
    to: ApplicationState,
    step: NewStep,
) -> WorkflowStep {
    let duration_ms = step
        .completed_at
        .map(|end| (end - step.started_at).num_milliseconds());
    WorkflowStep {
        id: StepId::new(),
        application_id: application_id.clone(),
        sequence,
        step_name: step.step_name,
        from_state: from,
        to_state: to,
        status: step.status,
        message: step.message,
        payload: step.payload,
        started_at: step.started_at,
        completed_at: step.completed_at,
        duration_ms,
        attempt: step.attempt,
    }
}

fn push_step(
    inner: &mut StoreInner,
    application_id: &ApplicationId,
    from: ApplicationState,
    to: ApplicationState,
    step: NewStep,
) {
    let steps = inner
        .steps
        .entry(application_id.as_str().to_string())
        .or_default();
    let sequence = steps.len() as u32 + 1;
    steps.push(materialize_step(application_id, sequence, from, to, step));
}

fn not_found(id: &ApplicationId) -> StoreError {
    StoreError::NotFound {
        resource: "application",
        id: id.as_str().to_string(),
    }
}

impl ApplicationStore for MemoryApplicationStore {
    async fn create_application(
        &self,
        owner_id: &OwnerId,
        form: &ApplicantForm,
        step: NewStep,
    ) -> Result<Application, StoreError> {
        let now = self.clock.now();
        let app = Application {
            id: ApplicationId::new(),
            owner_id: owner_id.clone(),
            form: form.clone(),
            state: ApplicationState::Draft,
            cancel_requested: false,
            lease: None,
            created_at: now,
            submitted_at: None,
            processed_at: None,
            decided_at: None,
            updated_at: now,
        };

        let mut inner = self.lock();
        push_step(
            &mut inner,
            &app.id,
            ApplicationState::Draft,
            ApplicationState::Draft,
            step,
        );
        inner
            .applications
            .insert(app.id.as_str().to_string(), app.clone());
        Ok(app)
    }

    async fn attach_document(
        &self,
        application_id: &ApplicationId,
        kind: DocumentKind,
        storage_handle: &str,
        meta: DocumentMeta,
    ) -> Result<Document, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let app = inner
            .applications
            .get(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?
            .clone();

        if !matches!(
            app.state,
            ApplicationState::FormSubmitted
                | ApplicationState::DocumentsUploaded
                | ApplicationState::ProcessingFailed
        ) {
            return Err(StoreError::InvalidState {
                state: app.state.as_str().to_string(),
                action: "attach_document".to_string(),
            });
        }
        if app.state == ApplicationState::ProcessingFailed && app.lease_live(now) {
            return Err(StoreError::Busy);
        }

        // Replace any existing document of this kind.
        let existing: Vec<String> = inner
            .documents
            .values()
            .filter(|d| d.application_id == *application_id && d.kind == kind)
            .map(|d| d.id.as_str().to_string())
            .collect();
        for id in existing {
            inner.documents.remove(&id);
        }

        let doc = Document {
            id: DocumentId::new(),
            application_id: application_id.clone(),
            kind,
            filename: meta.filename,
            byte_size: meta.byte_size,
            content_type: meta.content_type,
            storage_handle: storage_handle.to_string(),
            ocr: StageRecord::default(),
            ocr_text: None,
            ocr_pages: None,
            extract: StageRecord::default(),
            extracted_fields: None,
            created_at: now,
            updated_at: now,
        };
        inner
            .documents
            .insert(doc.id.as_str().to_string(), doc.clone());
        Ok(doc)
    }

    async fn transition(
        &self,
        application_id: &ApplicationId,
        expected_from: ApplicationState,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<TransitionOutcome, StoreError> {
        WorkflowStateMachine::validate(expected_from, to)?;

        let now = self.clock.now();
        let mut inner = self.lock();
        let app = inner
            .applications
            .get_mut(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;

        if app.state != expected_from {
            return Ok(TransitionOutcome::Conflict { actual: app.state });
        }

        app.state = to;
        app.updated_at = now;
        match to {
            ApplicationState::FormSubmitted if app.submitted_at.is_none() => {
                app.submitted_at = Some(now);
            }
            ApplicationState::DecisionCompleted => app.processed_at = Some(now),
            s if s.is_decided() => app.decided_at = Some(now),
            _ => {}
        }

        push_step(&mut inner, application_id, expected_from, to, step);
        Ok(TransitionOutcome::Applied)
    }

    async fn append_step(
        &self,
        application_id: &ApplicationId,
        step: NewStep,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let state = inner
            .applications
            .get(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?
            .state;
        push_step(&mut inner, application_id, state, state, step);
        Ok(())
    }

    async fn acquire_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let app = inner
            .applications
            .get_mut(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;

        if let Some(lease) = &app.lease {
            if !lease.is_expired(now) {
                return Ok(LeaseOutcome::Held(lease.clone()));
            }
        }
        let lease = Lease {
            worker_id: worker_id.to_string(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
        };
        app.lease = Some(lease.clone());
        Ok(LeaseOutcome::Acquired(lease))
    }

    async fn release_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let app = inner
            .applications
            .get_mut(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;
        if app
            .lease
            .as_ref()
            .map(|l| l.worker_id == worker_id)
            .unwrap_or(false)
        {
            app.lease = None;
        }
        Ok(())
    }

    async fn request_cancel(&self, application_id: &ApplicationId) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let app = inner
            .applications
            .get_mut(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;
        app.cancel_requested = true;
        app.updated_at = now;
        Ok(())
    }

    async fn update_document_stage(
        &self,
        document_id: &DocumentId,
        update: StageUpdate,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let doc = inner
            .documents
            .get_mut(document_id.as_str())
            .ok_or_else(|| StoreError::NotFound {
                resource: "document",
                id: document_id.as_str().to_string(),
            })?;

        let record = match update.stage {
            cw_domain::Stage::Ocr => &mut doc.ocr,
            cw_domain::Stage::Extract => &mut doc.extract,
            cw_domain::Stage::Decide => return Ok(false),
        };

        // Idempotency per (document, stage, attempt): stale attempts and
        // duplicate terminal writes are discarded.
        if update.attempt < record.attempt {
            return Ok(false);
        }
        if update.attempt == record.attempt && record.status.is_terminal() {
            return Ok(false);
        }

        record.attempt = update.attempt;
        record.status = update.status;
        record.confidence = update.confidence;
        record.error_kind = update.error_kind;
        record.error_message = update.error_message;
        record.completed_at = update.completed_at;

        match update.stage {
            cw_domain::Stage::Ocr => {
                if update.status == StageStatus::Running {
                    doc.ocr_text = None;
                    doc.ocr_pages = None;
                } else {
                    if update.text.is_some() {
                        doc.ocr_text = update.text;
                    }
                    if update.pages.is_some() {
                        doc.ocr_pages = update.pages;
                    }
                }
            }
            cw_domain::Stage::Extract => {
                if update.status == StageStatus::Running {
                    doc.extracted_fields = None;
                } else if update.fields.is_some() {
                    doc.extracted_fields = update.fields;
                }
            }
            cw_domain::Stage::Decide => {}
        }
        doc.updated_at = now;
        Ok(true)
    }

    async fn record_decision(
        &self,
        application_id: &ApplicationId,
        decision: &Decision,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let app = inner
            .applications
            .get(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;

        if inner.decisions.contains_key(application_id.as_str()) {
            return Err(StoreError::DecisionExists {
                application_id: application_id.as_str().to_string(),
            });
        }
        if app.state != ApplicationState::MakingDecision {
            return Err(StoreError::InvalidState {
                state: app.state.as_str().to_string(),
                action: "record_decision".to_string(),
            });
        }
        inner
            .decisions
            .insert(application_id.as_str().to_string(), decision.clone());
        Ok(())
    }

    async fn load(&self, application_id: &ApplicationId) -> Result<Application, StoreError> {
        let inner = self.lock();
        inner
            .applications
            .get(application_id.as_str())
            .cloned()
            .ok_or_else(|| not_found(application_id))
    }

    async fn load_full(
        &self,
        application_id: &ApplicationId,
    ) -> Result<FullApplication, StoreError> {
        let inner = self.lock();
        let application = inner
            .applications
            .get(application_id.as_str())
            .cloned()
            .ok_or_else(|| not_found(application_id))?;

        let mut documents: Vec<Document> = inner
            .documents
            .values()
            .filter(|d| d.application_id == *application_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        let steps = inner
            .steps
            .get(application_id.as_str())
            .cloned()
            .unwrap_or_default();
        let decision = inner.decisions.get(application_id.as_str()).cloned();

        Ok(FullApplication {
            application,
            documents,
            steps,
            decision,
        })
    }

    async fn reset(
        &self,
        application_id: &ApplicationId,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<Application, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let from = inner
            .applications
            .get(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?
            .state;
        WorkflowStateMachine::validate_reset(from, to)?;

        inner.decisions.remove(application_id.as_str());
        for doc in inner
            .documents
            .values_mut()
            .filter(|d| d.application_id == *application_id)
        {
            doc.ocr = StageRecord::default();
            doc.ocr_text = None;
            doc.ocr_pages = None;
            doc.extract = StageRecord::default();
            doc.extracted_fields = None;
            doc.updated_at = now;
        }

        let app = inner
            .applications
            .get_mut(application_id.as_str())
            .ok_or_else(|| not_found(application_id))?;
        app.state = to;
        app.cancel_requested = false;
        app.lease = None;
        app.processed_at = None;
        app.decided_at = None;
        if to == ApplicationState::Draft {
            app.submitted_at = None;
        }
        app.updated_at = now;
        let app = app.clone();

        push_step(&mut inner, application_id, from, to, step);
        Ok(app)
    }
}

// ============================================================================
// Job Queue
// ============================================================================

/// In-memory [`JobQueue`] backed by an unbounded channel. Delayed jobs are
/// redelivered by a spawned timer. Dead letters stay inspectable for tests.
pub struct MemoryJobQueue {
    tx: mpsc::UnboundedSender<StageJob>,
    dead: Mutex<Vec<(StageJob, String)>>,
}

impl MemoryJobQueue {
    pub fn new() -> (Self, MemoryJobSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                dead: Mutex::new(Vec::new()),
            },
            MemoryJobSource { rx },
        )
    }

    pub fn dead_letters(&self) -> Vec<(StageJob, String)> {
        self.dead
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: StageJob, delay: Option<Duration>) -> Result<(), QueueError> {
        match delay {
            None => self.tx.send(job).map_err(|e| QueueError::Publish {
                message: e.to_string(),
            }),
            Some(delay) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(job);
                });
                Ok(())
            }
        }
    }

    async fn dead_letter(&self, job: StageJob, reason: &str) -> Result<(), QueueError> {
        self.dead
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job, reason.to_string()));
        Ok(())
    }
}

/// Consumer half of [`MemoryJobQueue`].
pub struct MemoryJobSource {
    rx: mpsc::UnboundedReceiver<StageJob>,
}

impl JobSource for MemoryJobSource {
    async fn next_job(&mut self) -> Result<Option<StageJob>, QueueError> {
        Ok(self.rx.recv().await)
    }
}

// ============================================================================
// Blob Store
// ============================================================================

/// In-memory [`BlobStore`] with the same content-addressed handles as the
/// S3 adapter.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, bytes::Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put(&self, content: bytes::Bytes, meta: &BlobMeta) -> Result<String, StorageError> {
        let digest = hex::encode(Sha256::digest(&content));
        let handle = format!("sha256/{digest}/{}", meta.filename);
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), content);
        Ok(handle)
    }

    async fn open(&self, handle: &str) -> Result<bytes::Bytes, StorageError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                handle: handle.to_string(),
            })
    }
}

//! Stage worker.
//!
//! Pulls stage jobs from the queue, runs the matching executor under the
//! worker-level concurrency bound, applies the retry policy, and reports
//! completions back into the engine. At-least-once delivery is tolerated:
//! completion recording is idempotent per `(document, stage, attempt)` and
//! transitions are compare-and-set guarded.

use std::sync::Arc;
use std::time::Duration;

use cw_domain::{Stage, StageErrorKind, StageFailure};
use cw_ports::{
    ApplicationStore, BlobStore, CancelSignal, DecisionUpstream, ExtractUpstream, JobQueue,
    JobSource, OcrUpstream, QueueError, StageJob, StoreError,
};
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::engine::{running_update, StageOutcome, StageResult, WorkflowEngine};
use crate::error::EngineError;
use crate::executors::{
    DecisionExecutor, DecisionRequest, ExtractExecutor, ExtractRequest, OcrExecutor, OcrRequest,
};

pub struct StageWorker<S, Q, O, X, D, B> {
    engine: Arc<WorkflowEngine<S, Q>>,
    queue: Arc<Q>,
    ocr: OcrExecutor<O, B>,
    extract: ExtractExecutor<X, B>,
    decide: DecisionExecutor<D>,
    semaphore: Arc<Semaphore>,
    concurrency: u32,
    worker_id: String,
}

impl<S, Q, O, X, D, B> StageWorker<S, Q, O, X, D, B>
where
    S: ApplicationStore + 'static,
    Q: JobQueue + 'static,
    O: OcrUpstream + 'static,
    X: ExtractUpstream + 'static,
    D: DecisionUpstream + 'static,
    B: BlobStore + 'static,
{
    pub fn new(
        engine: Arc<WorkflowEngine<S, Q>>,
        ocr_upstream: Arc<O>,
        extract_upstream: Arc<X>,
        decision_upstream: Arc<D>,
        blobs: Arc<B>,
    ) -> Self {
        let config = engine.config().clone();
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            queue: engine.queue(),
            ocr: OcrExecutor::new(ocr_upstream, blobs.clone(), config.ocr_timeout()),
            extract: ExtractExecutor::new(extract_upstream, blobs, config.extract_timeout()),
            decide: DecisionExecutor::new(
                decision_upstream,
                config.decision_timeout(),
                config.eligibility.clone(),
            ),
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency)),
            concurrency: config.worker_concurrency as u32,
            worker_id: format!("worker-{}-{}", host, ulid::Ulid::new()),
            engine,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Consume jobs until the source closes, then drain in-flight work.
    pub async fn run<J: JobSource>(self: Arc<Self>, mut source: J) -> Result<(), QueueError> {
        info!(worker_id = %self.worker_id, "stage worker started");
        while let Some(job) = source.next_job().await? {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            tokio::spawn(async move {
                let job_id = job.job_id.clone();
                if let Err(e) = worker.process_job(job).await {
                    error!(job_id = %job_id.as_str(), error = %e, "job processing failed");
                }
                drop(permit);
            });
        }
        // Wait for in-flight jobs before returning.
        let _ = self.semaphore.acquire_many(self.concurrency).await;
        info!(worker_id = %self.worker_id, "stage worker stopped");
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(
            job_id = %job.job_id.as_str(),
            application_id = %job.application_id.as_str(),
            stage = job.stage.as_str(),
            attempt = job.attempt,
        )
    )]
    pub async fn process_job(&self, job: StageJob) -> Result<(), EngineError> {
        let store = self.engine.store();

        let app = match store.load(&job.application_id).await {
            Ok(app) => app,
            Err(StoreError::NotFound { .. }) => {
                warn!("application missing, dead-lettering job");
                self.queue.dead_letter(job, "application not found").await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Safe point: the persisted cancel flag is authoritative across
        // processes; the in-process signal reaches co-located executors.
        let cancel = self.engine.cancellations().signal(&job.application_id);
        if app.cancel_requested || cancel.is_cancelled() {
            cancel.cancel();
            return self
                .engine
                .handle_stage_completion(
                    &job.application_id,
                    job.stage,
                    job.document_id.as_ref(),
                    job.attempt,
                    Err(StageFailure::new(
                        StageErrorKind::Cancelled,
                        "cancelled before dispatch",
                    )),
                )
                .await;
        }

        let outcome = match self.execute(&job, &cancel).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(reason, "poison job, dead-lettering");
                self.queue.dead_letter(job, reason).await?;
                return Ok(());
            }
        };

        self.finish(job, outcome).await
    }

    /// Run the executor for the job. `Err` marks a poison job that can never
    /// be processed.
    async fn execute(
        &self,
        job: &StageJob,
        cancel: &CancelSignal,
    ) -> Result<StageOutcome, &'static str> {
        let store = self.engine.store();
        match job.stage {
            Stage::Ocr | Stage::Extract => {
                let Some(doc_id) = job.document_id.as_ref() else {
                    return Err("stage job missing document id");
                };
                let full = store
                    .load_full(&job.application_id)
                    .await
                    .map_err(|_| "application snapshot unavailable")?;
                let Some(doc) = full.documents.iter().find(|d| &d.id == doc_id) else {
                    return Err("document not found");
                };

                if job.stage == Stage::Ocr {
                    let request = OcrRequest {
                        document_id: doc.id.clone(),
                        storage_handle: doc.storage_handle.clone(),
                        content_type: doc.content_type.clone(),
                    };
                    Ok(self.ocr.run(&request, cancel).await.map(StageResult::Ocr))
                } else {
                    let request = ExtractRequest {
                        document_id: doc.id.clone(),
                        kind: doc.kind,
                        storage_handle: doc.storage_handle.clone(),
                        ocr_text: doc.ocr_text.clone().unwrap_or_default(),
                    };
                    Ok(self
                        .extract
                        .run(&request, cancel)
                        .await
                        .map(StageResult::Extract))
                }
            }

            Stage::Decide => {
                let full = store
                    .load_full(&job.application_id)
                    .await
                    .map_err(|_| "application snapshot unavailable")?;
                let request = DecisionRequest {
                    form: full.application.form.clone(),
                    bank_extract: full
                        .document(cw_domain::DocumentKind::BankStatement)
                        .and_then(|d| d.extracted_fields.clone()),
                    id_extract: full
                        .document(cw_domain::DocumentKind::IdentityCard)
                        .and_then(|d| d.extracted_fields.clone()),
                };
                Ok(self
                    .decide
                    .run(&request, cancel)
                    .await
                    .map(StageResult::Decide))
            }
        }
    }

    /// Apply the retry policy or report the completion to the engine.
    async fn finish(&self, job: StageJob, outcome: StageOutcome) -> Result<(), EngineError> {
        match outcome {
            Err(failure) if failure.kind.is_retryable() && job.attempt < job.max_attempts => {
                let delay = jittered(self.engine.config().retry_backoff(job.attempt));
                warn!(
                    kind = failure.kind.as_str(),
                    delay_ms = delay.as_millis() as u64,
                    "retryable stage failure, re-enqueueing"
                );
                let retry = job.next_attempt();
                if retry.stage != Stage::Decide {
                    if let Some(doc_id) = &retry.document_id {
                        self.engine
                            .store()
                            .update_document_stage(doc_id, running_update(retry.stage, retry.attempt))
                            .await?;
                    }
                }
                self.queue.enqueue(retry, Some(delay)).await?;
                Ok(())
            }
            outcome => {
                self.engine
                    .handle_stage_completion(
                        &job.application_id,
                        job.stage,
                        job.document_id.as_ref(),
                        job.attempt,
                        outcome,
                    )
                    .await
            }
        }
    }
}

/// Backoff with up to 50% additive jitter.
fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter_ms)
}

//! Full pipeline runs through the stage worker over the in-memory adapters,
//! with scripted upstream collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use cw_adapters::{ManualClock, MemoryApplicationStore, MemoryBlobStore, MemoryJobQueue};
use cw_domain::{
    ApplicantFormInput, ApplicationState, DecisionOutcome, DocumentKind, ModelVerdict, OwnerId,
};
use cw_engine::{DocumentSpec, EngineConfig, StageWorker, WorkflowEngine};
use cw_ports::{
    ApplicationStore, BlobMeta, BlobStore, CancelSignal, DecisionUpstream, DocumentMeta,
    ExtractUpstream, OcrOutput, OcrUpstream, UpstreamError,
};

struct StubOcr {
    /// Calls to fail with a transient error before succeeding.
    failures: AtomicU32,
}

impl OcrUpstream for StubOcr {
    async fn extract_text(
        &self,
        content: Bytes,
        _content_type: &str,
        _cancel: &CancelSignal,
    ) -> Result<OcrOutput, UpstreamError> {
        loop {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(UpstreamError::Transient {
                    message: "simulated hiccup".to_string(),
                });
            }
        }
        Ok(OcrOutput {
            text: String::from_utf8_lossy(&content).to_string(),
            confidence: 0.9,
            pages: 1,
        })
    }
}

struct StubExtract;

impl ExtractUpstream for StubExtract {
    async fn extract_structured(
        &self,
        kind: DocumentKind,
        _content: Bytes,
        _ocr_text: &str,
        _cancel: &CancelSignal,
    ) -> Result<serde_json::Value, UpstreamError> {
        Ok(match kind {
            DocumentKind::BankStatement => serde_json::json!({
                "monthly_income": 3000_00,
                "closing_balance": 1000_00,
                "account_holder_name": "A. Applicant",
                "period_start": "2026-05-01",
                "period_end": "2026-07-31",
                "confidence": 0.95,
            }),
            DocumentKind::IdentityCard => serde_json::json!({
                "national_id": "784-1990-0000001-0",
                "full_name": "A. Applicant",
                "date_of_birth": "1990-01-01",
                "expiry_date": "2030-01-01",
                "confidence": 0.93,
            }),
        })
    }
}

struct StubDecision;

impl DecisionUpstream for StubDecision {
    async fn decide(
        &self,
        _inputs: &serde_json::Value,
        _cancel: &CancelSignal,
    ) -> Result<ModelVerdict, UpstreamError> {
        Ok(ModelVerdict {
            outcome: DecisionOutcome::Approved,
            confidence: 0.9,
            reasoning: "income and balance verified".to_string(),
            benefit_amount: Some(1500_00),
        })
    }
}

async fn run_pipeline(
    ocr_failures: u32,
) -> (
    Arc<MemoryApplicationStore>,
    cw_domain::ApplicationId,
    tokio::task::JoinHandle<()>,
) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(MemoryApplicationStore::new(clock.clone()));
    let (queue, source) = MemoryJobQueue::new();
    let config = EngineConfig {
        retry_backoff_base_ms: 10,
        ..EngineConfig::default()
    };
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        Arc::new(queue),
        clock,
        config,
    ));

    let blobs = Arc::new(MemoryBlobStore::new());
    let mut specs = Vec::new();
    for (kind, bytes, filename, content_type) in [
        (
            DocumentKind::BankStatement,
            &b"monthly statement content"[..],
            "statement.pdf",
            "application/pdf",
        ),
        (
            DocumentKind::IdentityCard,
            &b"identity card content"[..],
            "id.png",
            "image/png",
        ),
    ] {
        let handle = blobs
            .put(
                Bytes::from_static(bytes),
                &BlobMeta {
                    filename: filename.to_string(),
                    content_type: content_type.to_string(),
                },
            )
            .await
            .unwrap();
        specs.push(DocumentSpec {
            kind,
            storage_handle: handle,
            meta: DocumentMeta {
                filename: filename.to_string(),
                byte_size: bytes.len() as i64,
                content_type: content_type.to_string(),
            },
        });
    }

    let worker = Arc::new(StageWorker::new(
        engine.clone(),
        Arc::new(StubOcr {
            failures: AtomicU32::new(ocr_failures),
        }),
        Arc::new(StubExtract),
        Arc::new(StubDecision),
        blobs,
    ));
    let worker_task = tokio::spawn(async move {
        let _ = worker.run(source).await;
    });

    let owner = OwnerId::from_string("owner-1".to_string());
    let input = ApplicantFormInput {
        full_name: "A. Applicant".to_string(),
        national_id: "784-1990-0000001-0".to_string(),
        phone: "+10000000000".to_string(),
        email: "a@x.test".to_string(),
    };
    let app = engine.start_application(&owner, &input).await.unwrap();
    engine
        .upload_documents(&owner, &app.id, specs)
        .await
        .unwrap();
    engine
        .begin_processing(&owner, &app.id, false)
        .await
        .unwrap();

    (store, app.id, worker_task)
}

async fn await_terminal(
    store: &MemoryApplicationStore,
    app_id: &cw_domain::ApplicationId,
) -> ApplicationState {
    for _ in 0..400 {
        let state = store.load(app_id).await.unwrap().state;
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "pipeline did not reach a terminal state: {:?}",
        store.load(app_id).await.unwrap().state
    );
}

#[tokio::test]
async fn worker_drives_the_happy_path_to_approval() {
    let (store, app_id, worker_task) = run_pipeline(0).await;

    let state = await_terminal(&store, &app_id).await;
    assert_eq!(state, ApplicationState::Approved);

    let full = store.load_full(&app_id).await.unwrap();
    let decision = full.decision.as_ref().expect("decision row");
    assert_eq!(decision.outcome, DecisionOutcome::Approved);
    assert_eq!(decision.benefit_amount, Some(1500_00));
    assert!(full
        .documents
        .iter()
        .all(|d| d.has_ocr_text() && d.extracted_fields.is_some()));

    worker_task.abort();
}

#[tokio::test]
async fn transient_ocr_failures_are_retried_with_backoff() {
    // Each document fails its first OCR attempt, then succeeds.
    let (store, app_id, worker_task) = run_pipeline(2).await;

    let state = await_terminal(&store, &app_id).await;
    assert_eq!(state, ApplicationState::Approved);

    // Two failing first attempts were retried somewhere across the two
    // documents; four OCR attempts ran in total.
    let full = store.load_full(&app_id).await.unwrap();
    let total_attempts: u32 = full.documents.iter().map(|d| d.ocr.attempt).sum();
    assert_eq!(total_attempts, 4);
    assert!(full.documents.iter().all(|d| d.has_ocr_text()));

    worker_task.abort();
}

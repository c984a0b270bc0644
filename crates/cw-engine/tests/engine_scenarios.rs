//! End-to-end workflow scenarios driven through the engine over the
//! in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cw_adapters::{ManualClock, MemoryApplicationStore, MemoryJobQueue, MemoryJobSource};
use cw_domain::{
    ApplicantFormInput, ApplicationState, DocumentKind, ModelVerdict, OwnerId, Stage,
    StageErrorKind, StageFailure, StageStatus,
};
use cw_engine::{
    progress_report, step_names, DocumentSpec, EngineConfig, EngineError, ExtractOutput,
    NextAction, StageResult, WorkflowEngine,
};
use cw_ports::{ApplicationStore, DocumentMeta, OcrOutput, StageJob};

type TestEngine = WorkflowEngine<MemoryApplicationStore, MemoryJobQueue>;

struct Harness {
    engine: Arc<TestEngine>,
    store: Arc<MemoryApplicationStore>,
    source: MemoryJobSource,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(MemoryApplicationStore::new(clock.clone()));
    let (queue, source) = MemoryJobQueue::new();
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        Arc::new(queue),
        clock.clone(),
        EngineConfig::default(),
    ));
    Harness {
        engine,
        store,
        source,
        clock,
    }
}

fn owner() -> OwnerId {
    OwnerId::from_string("owner-1".to_string())
}

fn form_input() -> ApplicantFormInput {
    ApplicantFormInput {
        full_name: "A. Applicant".to_string(),
        national_id: "784-1990-0000001-0".to_string(),
        phone: "+10000000000".to_string(),
        email: "a@x.test".to_string(),
    }
}

fn doc_spec(kind: DocumentKind) -> DocumentSpec {
    let filename = match kind {
        DocumentKind::BankStatement => "statement.pdf",
        DocumentKind::IdentityCard => "id.png",
    };
    DocumentSpec {
        kind,
        storage_handle: format!("sha256/{}/{filename}", kind.as_str().to_lowercase()),
        meta: DocumentMeta {
            filename: filename.to_string(),
            byte_size: 2048,
            content_type: if kind == DocumentKind::BankStatement {
                "application/pdf".to_string()
            } else {
                "image/png".to_string()
            },
        },
    }
}

async fn drain_jobs(source: &mut MemoryJobSource) -> Vec<StageJob> {
    use cw_ports::JobSource;
    let mut jobs = Vec::new();
    while let Ok(Ok(Some(job))) =
        tokio::time::timeout(Duration::from_millis(50), source.next_job()).await
    {
        jobs.push(job);
    }
    jobs
}

fn ocr_ok() -> cw_engine::StageOutcome {
    Ok(StageResult::Ocr(OcrOutput {
        text: "extracted document text".to_string(),
        confidence: 0.9,
        pages: 1,
    }))
}

fn bank_extract_ok() -> cw_engine::StageOutcome {
    Ok(StageResult::Extract(ExtractOutput {
        fields: serde_json::json!({
            "monthly_income": 3500_00,
            "closing_balance": 1200_00,
            "account_holder_name": "A. Applicant",
            "period_start": "2026-05-01",
            "period_end": "2026-07-31",
            "confidence": 0.9,
        }),
        confidence: 0.9,
    }))
}

fn id_extract_ok() -> cw_engine::StageOutcome {
    Ok(StageResult::Extract(ExtractOutput {
        fields: serde_json::json!({
            "national_id": "784-1990-0000001-0",
            "full_name": "A. Applicant",
            "date_of_birth": "1990-01-01",
            "expiry_date": "2030-01-01",
            "confidence": 0.92,
        }),
        confidence: 0.92,
    }))
}

fn verdict(outcome: cw_domain::DecisionOutcome, confidence: f64, benefit: Option<i64>) -> ModelVerdict {
    ModelVerdict {
        outcome,
        confidence,
        reasoning: "model reasoning".to_string(),
        benefit_amount: benefit,
    }
}

/// Submit the form, attach both documents, and begin processing. Returns the
/// application id and the enqueued OCR jobs.
async fn start_processing(h: &mut Harness) -> (cw_domain::ApplicationId, Vec<StageJob>) {
    let app = h
        .engine
        .start_application(&owner(), &form_input())
        .await
        .expect("start application");
    assert_eq!(app.state, ApplicationState::FormSubmitted);

    let (_, app) = h
        .engine
        .upload_documents(
            &owner(),
            &app.id,
            vec![
                doc_spec(DocumentKind::BankStatement),
                doc_spec(DocumentKind::IdentityCard),
            ],
        )
        .await
        .expect("upload documents");
    assert_eq!(app.state, ApplicationState::DocumentsUploaded);

    let started = h
        .engine
        .begin_processing(&owner(), &app.id, false)
        .await
        .expect("begin processing");
    assert_eq!(started.application.state, ApplicationState::ScanningDocuments);
    assert!(started.estimated_completion_seconds > 0);

    let jobs = drain_jobs(&mut h.source).await;
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.stage == Stage::Ocr && j.attempt == 1));
    (app.id, jobs)
}

async fn complete_ocr(h: &Harness, jobs: &[StageJob]) {
    for job in jobs.iter().filter(|j| j.stage == Stage::Ocr) {
        h.engine
            .handle_stage_completion(
                &job.application_id,
                Stage::Ocr,
                job.document_id.as_ref(),
                job.attempt,
                ocr_ok(),
            )
            .await
            .expect("ocr completion");
    }
}

#[tokio::test]
async fn happy_path_approves_with_benefit() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    complete_ocr(&h, &ocr_jobs).await;
    assert_eq!(
        h.store.load(&app_id).await.unwrap().state,
        ApplicationState::Analyzing
    );

    let extract_jobs = drain_jobs(&mut h.source).await;
    assert_eq!(extract_jobs.len(), 2);
    for job in &extract_jobs {
        let full = h.store.load_full(&app_id).await.unwrap();
        let doc = full
            .documents
            .iter()
            .find(|d| Some(&d.id) == job.document_id.as_ref())
            .expect("document for extract job");
        let outcome = match doc.kind {
            DocumentKind::BankStatement => bank_extract_ok(),
            DocumentKind::IdentityCard => id_extract_ok(),
        };
        h.engine
            .handle_stage_completion(&app_id, Stage::Extract, job.document_id.as_ref(), job.attempt, outcome)
            .await
            .expect("extract completion");
    }
    assert_eq!(
        h.store.load(&app_id).await.unwrap().state,
        ApplicationState::MakingDecision
    );

    let decide_jobs = drain_jobs(&mut h.source).await;
    assert_eq!(decide_jobs.len(), 1);
    assert_eq!(decide_jobs[0].stage, Stage::Decide);

    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Decide,
            None,
            1,
            Ok(StageResult::Decide(verdict(
                cw_domain::DecisionOutcome::Approved,
                0.85,
                Some(2000_00),
            ))),
        )
        .await
        .expect("decide completion");

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Approved);
    assert_eq!(full.application.state.progress(), 100);
    assert!(full.application.processed_at.is_some());
    assert!(full.application.decided_at.is_some());

    let decision = full.decision.as_ref().expect("decision row");
    assert_eq!(decision.outcome, cw_domain::DecisionOutcome::Approved);
    assert_eq!(decision.benefit_amount, Some(2000_00));
    assert_eq!(decision.confidence, 0.85);

    // Step completeness: transition steps chain, and progress derived from
    // the chain never decreases.
    let transitions: Vec<_> = full
        .steps
        .iter()
        .filter(|s| s.from_state != s.to_state)
        .collect();
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].to_state, pair[1].from_state);
    }
    for pair in transitions.windows(2) {
        assert!(pair[0].to_state.progress() <= pair[1].to_state.progress());
    }
    let names: Vec<_> = transitions.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            step_names::SUBMIT_FORM,
            step_names::DOCUMENTS_UPLOADED,
            step_names::BEGIN_PROCESSING,
            step_names::OCR_RESULTS,
            step_names::START_ANALYSIS,
            step_names::ANALYSIS_RESULTS,
            step_names::START_DECISION,
            step_names::DECIDE,
            step_names::FINALIZE,
        ]
    );
}

#[tokio::test]
async fn high_income_is_rejected() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;
    complete_ocr(&h, &ocr_jobs).await;

    let extract_jobs = drain_jobs(&mut h.source).await;
    for job in &extract_jobs {
        let full = h.store.load_full(&app_id).await.unwrap();
        let doc = full
            .documents
            .iter()
            .find(|d| Some(&d.id) == job.document_id.as_ref())
            .unwrap();
        let outcome = match doc.kind {
            DocumentKind::BankStatement => Ok(StageResult::Extract(ExtractOutput {
                fields: serde_json::json!({
                    "monthly_income": 6000_00,
                    "closing_balance": 8000_00,
                    "confidence": 0.9,
                }),
                confidence: 0.9,
            })),
            DocumentKind::IdentityCard => id_extract_ok(),
        };
        h.engine
            .handle_stage_completion(&app_id, Stage::Extract, job.document_id.as_ref(), job.attempt, outcome)
            .await
            .unwrap();
    }

    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Decide,
            None,
            1,
            Ok(StageResult::Decide(verdict(
                cw_domain::DecisionOutcome::Rejected,
                0.9,
                None,
            ))),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Rejected);
    let decision = full.decision.as_ref().unwrap();
    assert_eq!(decision.benefit_amount, None);
}

#[tokio::test]
async fn partial_success_lands_in_needs_review() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    for job in &ocr_jobs {
        let full = h.store.load_full(&app_id).await.unwrap();
        let doc = full
            .documents
            .iter()
            .find(|d| Some(&d.id) == job.document_id.as_ref())
            .unwrap();
        let outcome = match doc.kind {
            DocumentKind::BankStatement => ocr_ok(),
            DocumentKind::IdentityCard => Err(StageFailure::new(
                StageErrorKind::EmptyResult,
                "ocr produced no usable text (confidence 0.02)",
            )),
        };
        h.engine
            .handle_stage_completion(&app_id, Stage::Ocr, job.document_id.as_ref(), job.attempt, outcome)
            .await
            .unwrap();
    }

    // Partial-success mode: only the bank statement is analyzed.
    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Analyzing);
    let analysis_step = full
        .steps
        .iter()
        .find(|s| s.step_name == step_names::START_ANALYSIS)
        .unwrap();
    assert_eq!(analysis_step.payload["partial_success"], true);

    let extract_jobs = drain_jobs(&mut h.source).await;
    assert_eq!(extract_jobs.len(), 1);
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Extract,
            extract_jobs[0].document_id.as_ref(),
            1,
            bank_extract_ok(),
        )
        .await
        .unwrap();

    // The decision executor runs with id_extract absent and reports
    // insufficient data.
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Decide,
            None,
            1,
            Ok(StageResult::Decide(ModelVerdict {
                outcome: cw_domain::DecisionOutcome::NeedsReview,
                confidence: 0.0,
                reasoning: "insufficient_data".to_string(),
                benefit_amount: None,
            })),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::NeedsReview);
    let decision = full.decision.as_ref().unwrap();
    assert_eq!(decision.reasoning, "insufficient_data");
    assert_eq!(decision.confidence, 0.0);
}

#[tokio::test]
async fn all_ocr_failures_allow_retry() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    for job in &ocr_jobs {
        h.engine
            .handle_stage_completion(
                &app_id,
                Stage::Ocr,
                job.document_id.as_ref(),
                job.attempt,
                Err(StageFailure::new(StageErrorKind::EmptyResult, "no text")),
            )
            .await
            .unwrap();
    }

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::ProcessingFailed);
    let failed_step = full
        .steps
        .iter()
        .find(|s| s.to_state == ApplicationState::ProcessingFailed)
        .unwrap();
    assert_eq!(failed_step.payload["reason"], "ALL_OCR_FAILED");

    let report = progress_report(&full, Utc::now());
    assert!(report.can_retry);
    assert_eq!(report.next_action, NextAction::Retry);

    // Retry re-enters SCANNING_DOCUMENTS with incremented attempts.
    let started = h
        .engine
        .begin_processing(&owner(), &app_id, true)
        .await
        .unwrap();
    assert_eq!(started.application.state, ApplicationState::ScanningDocuments);
    let retry_jobs = drain_jobs(&mut h.source).await;
    assert_eq!(retry_jobs.len(), 2);
    assert!(retry_jobs.iter().all(|j| j.attempt == 2));
}

#[tokio::test]
async fn cancellation_mid_analyzing_parks_late_results() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;
    complete_ocr(&h, &ocr_jobs).await;
    let extract_jobs = drain_jobs(&mut h.source).await;
    assert_eq!(extract_jobs.len(), 2);

    // Cancel while extraction jobs are in flight: the state holds until the
    // next safe point.
    let app = h.engine.cancel(&owner(), &app_id).await.unwrap();
    assert_eq!(app.state, ApplicationState::Analyzing);
    assert!(app.cancel_requested);
    assert!(h
        .engine
        .cancellations()
        .signal(&app_id)
        .is_cancelled());

    // A late extraction result is persisted for diagnostics but the workflow
    // transitions to CANCELLED instead of advancing.
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Extract,
            extract_jobs[0].document_id.as_ref(),
            1,
            bank_extract_ok(),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Cancelled);
    let late_doc = full
        .documents
        .iter()
        .find(|d| Some(&d.id) == extract_jobs[0].document_id.as_ref())
        .unwrap();
    assert_eq!(late_doc.extract.status, StageStatus::Completed);
    assert!(late_doc.extracted_fields.is_some());
    assert!(full.decision.is_none());

    // Even later results no longer drive transitions.
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Extract,
            extract_jobs[1].document_id.as_ref(),
            1,
            id_extract_ok(),
        )
        .await
        .unwrap();
    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Cancelled);
}

#[tokio::test]
async fn duplicate_completion_callbacks_are_idempotent() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    let job = &ocr_jobs[0];
    for _ in 0..3 {
        h.engine
            .handle_stage_completion(&app_id, Stage::Ocr, job.document_id.as_ref(), job.attempt, ocr_ok())
            .await
            .unwrap();
    }

    // One document done, one pending: still scanning, no extra steps.
    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::ScanningDocuments);
    let ocr_steps = full
        .steps
        .iter()
        .filter(|s| s.step_name == step_names::OCR_RESULTS)
        .count();
    assert_eq!(ocr_steps, 0);

    let job = &ocr_jobs[1];
    for _ in 0..2 {
        h.engine
            .handle_stage_completion(&app_id, Stage::Ocr, job.document_id.as_ref(), job.attempt, ocr_ok())
            .await
            .unwrap();
    }

    let full = h.store.load_full(&app_id).await.unwrap();
    let ocr_steps = full
        .steps
        .iter()
        .filter(|s| s.step_name == step_names::OCR_RESULTS)
        .count();
    assert_eq!(ocr_steps, 1);
}

#[tokio::test]
async fn held_lease_defers_advance_to_the_holder() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    // Another worker holds the advance lease.
    h.store
        .acquire_lease(&app_id, "other-worker", Duration::from_secs(30))
        .await
        .unwrap();

    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Ocr,
            ocr_jobs[0].document_id.as_ref(),
            1,
            ocr_ok(),
        )
        .await
        .unwrap();

    // The result is persisted but the state did not move.
    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::ScanningDocuments);
    let done = full
        .documents
        .iter()
        .filter(|d| d.ocr.status == StageStatus::Completed)
        .count();
    assert_eq!(done, 1);

    // Once the holder releases, the next completion advances using both
    // persisted results, producing exactly one OCR_RESULTS step.
    h.store.release_lease(&app_id, "other-worker").await.unwrap();
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Ocr,
            ocr_jobs[1].document_id.as_ref(),
            1,
            ocr_ok(),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Analyzing);
    let ocr_steps = full
        .steps
        .iter()
        .filter(|s| s.step_name == step_names::OCR_RESULTS)
        .count();
    assert_eq!(ocr_steps, 1);
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;

    h.store
        .acquire_lease(&app_id, "crashed-worker", Duration::from_secs(30))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::seconds(31));

    complete_ocr(&h, &ocr_jobs).await;
    assert_eq!(
        h.store.load(&app_id).await.unwrap().state,
        ApplicationState::Analyzing
    );
}

#[tokio::test]
async fn second_process_call_observes_already_running() {
    let mut h = harness();
    let (app_id, _) = start_processing(&mut h).await;

    let err = h
        .engine
        .begin_processing(&owner(), &app_id, false)
        .await
        .expect_err("second process call");
    assert!(matches!(err, EngineError::AlreadyRunning));
}

#[tokio::test]
async fn single_document_upload_keeps_form_submitted() {
    let mut h = harness();
    let app = h
        .engine
        .start_application(&owner(), &form_input())
        .await
        .unwrap();

    let (_, app) = h
        .engine
        .upload_documents(&owner(), &app.id, vec![doc_spec(DocumentKind::BankStatement)])
        .await
        .unwrap();
    assert_eq!(app.state, ApplicationState::FormSubmitted);

    let (_, app) = h
        .engine
        .upload_documents(&owner(), &app.id, vec![doc_spec(DocumentKind::IdentityCard)])
        .await
        .unwrap();
    assert_eq!(app.state, ApplicationState::DocumentsUploaded);
}

#[tokio::test]
async fn invalid_form_is_rejected_synchronously() {
    let h = harness();
    let mut input = form_input();
    input.email = "not-an-email".to_string();
    let err = h
        .engine
        .start_application(&owner(), &input)
        .await
        .expect_err("invalid form");
    match err {
        EngineError::InvalidForm(errors) => {
            assert_eq!(errors[0].field, "email");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn foreign_applications_are_invisible() {
    let mut h = harness();
    let (app_id, _) = start_processing(&mut h).await;

    let intruder = OwnerId::from_string("owner-2".to_string());
    let err = h
        .engine
        .cancel(&intruder, &app_id)
        .await
        .expect_err("foreign cancel");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn idle_cancel_transitions_immediately() {
    let h = harness();
    let app = h
        .engine
        .start_application(&owner(), &form_input())
        .await
        .unwrap();

    let app = h.engine.cancel(&owner(), &app.id).await.unwrap();
    assert_eq!(app.state, ApplicationState::Cancelled);

    let err = h
        .engine
        .cancel(&owner(), &app.id)
        .await
        .expect_err("cancel of terminal application");
    assert!(matches!(err, EngineError::Terminal { .. }));
}

#[tokio::test]
async fn reset_returns_a_decided_application_to_form_submitted() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;
    complete_ocr(&h, &ocr_jobs).await;
    let extract_jobs = drain_jobs(&mut h.source).await;
    for job in &extract_jobs {
        let full = h.store.load_full(&app_id).await.unwrap();
        let doc = full
            .documents
            .iter()
            .find(|d| Some(&d.id) == job.document_id.as_ref())
            .unwrap();
        let outcome = match doc.kind {
            DocumentKind::BankStatement => bank_extract_ok(),
            DocumentKind::IdentityCard => id_extract_ok(),
        };
        h.engine
            .handle_stage_completion(&app_id, Stage::Extract, job.document_id.as_ref(), 1, outcome)
            .await
            .unwrap();
    }
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Decide,
            None,
            1,
            Ok(StageResult::Decide(verdict(
                cw_domain::DecisionOutcome::Approved,
                0.85,
                Some(1000_00),
            ))),
        )
        .await
        .unwrap();
    assert_eq!(
        h.store.load(&app_id).await.unwrap().state,
        ApplicationState::Approved
    );

    let app = h
        .engine
        .reset(&app_id, ApplicationState::FormSubmitted)
        .await
        .unwrap();
    assert_eq!(app.state, ApplicationState::FormSubmitted);

    let full = h.store.load_full(&app_id).await.unwrap();
    assert!(full.decision.is_none());
    assert!(full
        .documents
        .iter()
        .all(|d| d.ocr.status == StageStatus::Pending && d.ocr_text.is_none()));
    assert!(full
        .steps
        .iter()
        .any(|s| s.step_name == step_names::RESET));
}

#[tokio::test]
async fn rule_overrides_confident_model_and_journals_the_disagreement() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;
    complete_ocr(&h, &ocr_jobs).await;
    let extract_jobs = drain_jobs(&mut h.source).await;
    for job in &extract_jobs {
        let full = h.store.load_full(&app_id).await.unwrap();
        let doc = full
            .documents
            .iter()
            .find(|d| Some(&d.id) == job.document_id.as_ref())
            .unwrap();
        let outcome = match doc.kind {
            DocumentKind::BankStatement => Ok(StageResult::Extract(ExtractOutput {
                fields: serde_json::json!({
                    "monthly_income": 9000_00,
                    "closing_balance": 100_00,
                    "confidence": 0.95,
                }),
                confidence: 0.95,
            })),
            DocumentKind::IdentityCard => id_extract_ok(),
        };
        h.engine
            .handle_stage_completion(&app_id, Stage::Extract, job.document_id.as_ref(), 1, outcome)
            .await
            .unwrap();
    }

    // The model confidently approves, but the income rule rejects.
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Decide,
            None,
            1,
            Ok(StageResult::Decide(verdict(
                cw_domain::DecisionOutcome::Approved,
                0.95,
                Some(2000_00),
            ))),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    assert_eq!(full.application.state, ApplicationState::Rejected);
    assert!(full
        .steps
        .iter()
        .any(|s| s.step_name == step_names::POLICY_DISAGREEMENT));
}

#[tokio::test]
async fn progress_report_tracks_partial_results() {
    let mut h = harness();
    let (app_id, ocr_jobs) = start_processing(&mut h).await;
    complete_ocr(&h, &ocr_jobs).await;
    let extract_jobs = drain_jobs(&mut h.source).await;

    // Complete only the bank statement extraction.
    let full = h.store.load_full(&app_id).await.unwrap();
    let bank_id = full.document(DocumentKind::BankStatement).unwrap().id.clone();
    let bank_job = extract_jobs
        .iter()
        .find(|j| j.document_id.as_ref() == Some(&bank_id))
        .unwrap();
    h.engine
        .handle_stage_completion(
            &app_id,
            Stage::Extract,
            bank_job.document_id.as_ref(),
            bank_job.attempt,
            bank_extract_ok(),
        )
        .await
        .unwrap();

    let full = h.store.load_full(&app_id).await.unwrap();
    let report = progress_report(&full, Utc::now());
    assert_eq!(report.overall_status, ApplicationState::Analyzing);
    assert_eq!(report.progress, 60);
    assert_eq!(report.next_action, NextAction::AwaitProcessing);
    assert_eq!(report.documents.len(), 2);
    assert!(report.partial_results.bank_extract.is_some());
    assert!(report.partial_results.id_extract.is_none());
    assert!(report.steps.len() >= 5);
}

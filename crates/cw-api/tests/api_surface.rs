//! HTTP surface tests over the in-memory adapters.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use cw_adapters::{MemoryApplicationStore, MemoryBlobStore, MemoryJobQueue, MemoryJobSource};
use cw_api::{router, AppState, AuthConfig, BearerAuth};
use cw_engine::{EngineConfig, WorkflowEngine};
use cw_ports::SystemClock;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    // Keeps the queue's consumer half alive so enqueues succeed.
    _source: MemoryJobSource,
}

fn test_app(config: EngineConfig) -> TestApp {
    let store = Arc::new(MemoryApplicationStore::new(Arc::new(SystemClock)));
    let (queue, source) = MemoryJobQueue::new();
    let engine = Arc::new(WorkflowEngine::new(
        store,
        Arc::new(queue),
        Arc::new(SystemClock),
        config,
    ));
    let state = AppState::new(
        engine,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(BearerAuth::new(AuthConfig::test_mode())),
    );
    TestApp {
        router: router(state),
        _source: source,
    }
}

fn json_request(method: &str, uri: &str, owner: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(owner) = owner {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {owner}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn valid_form() -> serde_json::Value {
    serde_json::json!({
        "full_name": "A. Applicant",
        "national_id": "784-1990-0000001-0",
        "phone": "+10000000000",
        "email": "a@x.test",
    })
}

const BOUNDARY: &str = "X-CASEWORK-TEST-BOUNDARY";

fn multipart_body(parts: &[(&str, &str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content_type, bytes) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(app_id: &str, owner: &str, parts: &[(&str, &str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/workflow/upload-documents/{app_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {owner}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn create_application(app: &TestApp, owner: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/workflow/start-application",
            Some(owner),
            valid_form(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["state"], "FORM_SUBMITTED");
    assert_eq!(body["progress"], 20);
    body["application_id"].as_str().unwrap().to_string()
}

async fn upload_both_documents(app: &TestApp, app_id: &str, owner: &str) {
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            app_id,
            owner,
            &[
                (
                    "bank_statement",
                    "statement.pdf",
                    "application/pdf",
                    b"bank statement bytes",
                ),
                ("identity_card", "id.png", "image/png", b"identity bytes"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["state"], "DOCUMENTS_UPLOADED");
    assert_eq!(body["progress"], 30);
    assert_eq!(body["document_ids"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let app = test_app(EngineConfig::default());
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn workflow_routes_require_a_bearer_token() {
    let app = test_app(EngineConfig::default());
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/workflow/start-application",
            None,
            valid_form(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn invalid_forms_report_typed_field_errors() {
    let app = test_app(EngineConfig::default());
    let mut form = valid_form();
    form["email"] = serde_json::json!("not-an-email");
    form["phone"] = serde_json::json!("");

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/workflow/start-application",
            Some("owner-1"),
            form,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "INVALID_FORM");
    let fields = body["details"]["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 2);
}

#[tokio::test]
async fn full_flow_start_upload_process_status() {
    let app = test_app(EngineConfig::default());
    let app_id = create_application(&app, "owner-1").await;
    upload_both_documents(&app, &app_id, "owner-1").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/workflow/process/{app_id}"),
            Some("owner-1"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["state"], "SCANNING_DOCUMENTS");
    assert!(body["estimated_completion_seconds"].as_u64().unwrap() > 0);
    assert!(body["job_id"].as_str().unwrap().starts_with("job_"));

    // A second process call loses the race.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/workflow/process/{app_id}"),
            Some("owner-1"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "ALREADY_RUNNING");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/workflow/status/{app_id}"))
                .header(header::AUTHORIZATION, "Bearer owner-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["overall_status"], "SCANNING_DOCUMENTS");
    assert_eq!(body["progress"], 40);
    assert_eq!(body["next_action"], "await_processing");
    assert_eq!(body["can_retry"], false);
    assert_eq!(body["documents"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unsupported_upload_formats_are_rejected() {
    let app = test_app(EngineConfig::default());
    let app_id = create_application(&app, "owner-1").await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            &app_id,
            "owner-1",
            &[(
                "bank_statement",
                "statement.docx",
                "application/msword",
                b"doc bytes",
            )],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "UNSUPPORTED_FORMAT");
}

#[tokio::test]
async fn file_size_limit_is_exact() {
    let config = EngineConfig {
        max_file_size_bytes: 64,
        ..EngineConfig::default()
    };
    let app = test_app(config);
    let app_id = create_application(&app, "owner-1").await;

    // Exactly at the limit: accepted.
    let at_limit = vec![0u8; 64];
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            &app_id,
            "owner-1",
            &[("bank_statement", "s.pdf", "application/pdf", &at_limit)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // One byte over: rejected.
    let over_limit = vec![0u8; 65];
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            &app_id,
            "owner-1",
            &[("identity_card", "id.png", "image/png", &over_limit)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn foreign_applications_surface_as_not_found() {
    let app = test_app(EngineConfig::default());
    let app_id = create_application(&app, "owner-1").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/workflow/status/{app_id}"))
                .header(header::AUTHORIZATION, "Bearer owner-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "APP_NOT_FOUND");
}

#[tokio::test]
async fn cancel_is_terminal_and_final() {
    let app = test_app(EngineConfig::default());
    let app_id = create_application(&app, "owner-1").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/workflow/cancel/{app_id}"),
            Some("owner-1"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["state"], "CANCELLED");

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/workflow/cancel/{app_id}"),
            Some("owner-1"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "TERMINAL");
}

#[tokio::test]
async fn processing_a_draft_application_is_invalid() {
    let app = test_app(EngineConfig::default());
    let app_id = create_application(&app, "owner-1").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/workflow/process/{app_id}"),
            Some("owner-1"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = response_json(response).await;
    assert_eq!(body["error_code"], "INVALID_STATE");
}

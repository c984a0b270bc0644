//! Casework stage worker service entry point.
//!
//! Consumes stage jobs from NATS, runs the OCR, extraction, and decision
//! executors against the configured collaborators, and records completions
//! through the workflow engine.

use std::sync::Arc;

use cw_adapters::{
    HttpDecisionClient, HttpExtractClient, HttpOcrClient, NatsJobQueue, PgApplicationStore,
    S3BlobStore, ServiceConfig,
};
use cw_engine::{EngineConfig, StageWorker, WorkflowEngine};
use cw_ports::SystemClock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cw_worker=debug,cw_engine=debug,cw_adapters=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let service_config = ServiceConfig::from_env();
    let engine_config = EngineConfig::from_env();

    let store = PgApplicationStore::connect(&service_config.postgres.url)
        .await
        .expect("failed to connect to PostgreSQL");
    store.migrate().await.expect("failed to run migrations");

    let queue = NatsJobQueue::connect(service_config.nats.clone())
        .await
        .expect("failed to connect to NATS");
    let source = queue
        .job_source()
        .await
        .expect("failed to create job consumer");

    let blobs = S3BlobStore::connect(service_config.object_store.clone())
        .await
        .expect("failed to connect to object storage");

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(store),
        Arc::new(queue),
        Arc::new(SystemClock),
        engine_config,
    ));

    let worker = Arc::new(StageWorker::new(
        engine,
        Arc::new(HttpOcrClient::new(&service_config.upstreams)),
        Arc::new(HttpExtractClient::new(&service_config.upstreams)),
        Arc::new(HttpDecisionClient::new(&service_config.upstreams)),
        Arc::new(blobs),
    ));

    tracing::info!(worker_id = %worker.worker_id(), "casework stage worker starting");
    if let Err(e) = worker.run(source).await {
        tracing::error!(error = %e, "stage worker exited with error");
        std::process::exit(1);
    }
}

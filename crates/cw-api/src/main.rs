//! Casework HTTP API service entry point.

use std::sync::Arc;

use cw_adapters::{NatsJobQueue, PgApplicationStore, S3BlobStore, ServiceConfig};
use cw_api::{router, AppState, AuthConfig, BearerAuth};
use cw_engine::{EngineConfig, WorkflowEngine};
use cw_ports::SystemClock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cw_api=debug,cw_engine=debug,tower_http=debug".into()),
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

    let blobs = S3BlobStore::connect(service_config.object_store.clone())
        .await
        .expect("failed to connect to object storage");

    let auth = BearerAuth::new(AuthConfig::from_env());
    auth.initialize()
        .await
        .expect("failed to initialize bearer auth");

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(store),
        Arc::new(queue),
        Arc::new(SystemClock),
        engine_config,
    ));
    let state = AppState::new(engine, Arc::new(blobs), Arc::new(auth));
    let app = router(state);

    let addr = std::env::var("CW_API_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind API listener");

    tracing::info!("casework API listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .expect("failed to start server");
}

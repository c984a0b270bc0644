//! Casework adapter implementations.
//!
//! Adapters for the ports defined in cw-ports:
//! - PostgreSQL application store
//! - NATS JetStream job queue
//! - S3/MinIO blob store
//! - HTTP clients for the OCR, extraction, and decision collaborators
//! - In-memory store, queue, blob store, and clock for tests

pub mod config;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod storage;
pub mod upstream;

pub use config::{PostgresConfig, ServiceConfig};
pub use memory::{
    ManualClock, MemoryApplicationStore, MemoryBlobStore, MemoryJobQueue, MemoryJobSource,
};
pub use postgres::PgApplicationStore;
pub use queue::{DeadLetter, NatsJobQueue, NatsJobSource, NatsQueueConfig};
pub use storage::{ObjectStoreConfig, S3BlobStore};
pub use upstream::{HttpDecisionClient, HttpExtractClient, HttpOcrClient, UpstreamConfig};

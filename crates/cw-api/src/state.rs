//! Shared API state.

use std::sync::Arc;

use axum::extract::FromRef;
use cw_engine::WorkflowEngine;
use cw_ports::{ApplicationStore, BlobStore, JobQueue};

use crate::auth::BearerAuth;

/// Application state threaded through every handler: the engine, the blob
/// store for uploads, and the bearer validator. Nothing reaches into
/// process-global state.
pub struct AppState<S, Q, B> {
    pub engine: Arc<WorkflowEngine<S, Q>>,
    pub blobs: Arc<B>,
    pub auth: Arc<BearerAuth>,
}

impl<S, Q, B> Clone for AppState<S, Q, B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            blobs: self.blobs.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<S, Q, B> AppState<S, Q, B>
where
    S: ApplicationStore,
    Q: JobQueue,
    B: BlobStore,
{
    pub fn new(
        engine: Arc<WorkflowEngine<S, Q>>,
        blobs: Arc<B>,
        auth: Arc<BearerAuth>,
    ) -> Self {
        Self {
            engine,
            blobs,
            auth,
        }
    }
}

impl<S, Q, B> FromRef<AppState<S, Q, B>> for Arc<BearerAuth> {
    fn from_ref(state: &AppState<S, Q, B>) -> Self {
        state.auth.clone()
    }
}

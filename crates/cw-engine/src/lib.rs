//! Casework workflow engine.
//!
//! The scheduler for the eligibility pipeline: entry points invoked by HTTP
//! handlers, the lease-guarded advance algorithm driven by stage completion
//! callbacks, the stage executors, the generic stage worker, and the
//! progress projection.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod executors;
pub mod progress;
pub mod worker;

pub use cancel::CancelRegistry;
pub use config::EngineConfig;
pub use engine::{
    step_names, DocumentSpec, ProcessingStarted, StageOutcome, StageResult, WorkflowEngine,
};
pub use error::EngineError;
pub use executors::{
    DecisionExecutor, DecisionRequest, ExtractExecutor, ExtractOutput, ExtractRequest,
    OcrExecutor, OcrRequest,
};
pub use progress::{progress_report, NextAction, ProgressReport};
pub use worker::StageWorker;

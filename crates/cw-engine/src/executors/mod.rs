//! Stage executors.
//!
//! One executor per stage. Each is a stateless adapter: typed request plus a
//! cancellation signal in, typed output or a classified [`StageFailure`]
//! out. Executors never write to the store; the engine records results.

pub mod decide;
pub mod extract;
pub mod ocr;

pub use decide::{DecisionExecutor, DecisionRequest};
pub use extract::{ExtractExecutor, ExtractOutput, ExtractRequest};
pub use ocr::{OcrExecutor, OcrRequest};

use cw_domain::{StageErrorKind, StageFailure};
use cw_ports::UpstreamError;

/// Map a raw upstream error onto the stage error taxonomy.
pub(crate) fn classify_upstream(e: UpstreamError) -> StageFailure {
    match e {
        UpstreamError::Unavailable { message } => {
            StageFailure::new(StageErrorKind::UpstreamUnavailable, message)
        }
        UpstreamError::Unsupported { message } => {
            StageFailure::new(StageErrorKind::UnsupportedFormat, message)
        }
        UpstreamError::Parse { message } => {
            StageFailure::new(StageErrorKind::ParseFailed, message)
        }
        UpstreamError::Transient { message } => {
            StageFailure::new(StageErrorKind::Transient, message)
        }
        UpstreamError::Cancelled => {
            StageFailure::new(StageErrorKind::Cancelled, "upstream call cancelled")
        }
    }
}

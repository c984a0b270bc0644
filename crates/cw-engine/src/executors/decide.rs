//! Decision stage executor.

use std::sync::Arc;
use std::time::Duration;

use cw_domain::{
    policy, ApplicantForm, EligibilityConfig, ModelVerdict, StageErrorKind, StageFailure,
};
use cw_ports::{CancelSignal, DecisionUpstream, UpstreamError};
use tracing::{instrument, warn};

use super::classify_upstream;

/// Aggregated decision inputs. Either extract may be absent in
/// partial-success mode.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub form: ApplicantForm,
    pub bank_extract: Option<serde_json::Value>,
    pub id_extract: Option<serde_json::Value>,
}

/// Runs the decision model, falling back to the deterministic rule set when
/// the upstream is unavailable.
pub struct DecisionExecutor<U> {
    upstream: Arc<U>,
    timeout: Duration,
    eligibility: EligibilityConfig,
}

impl<U: DecisionUpstream> DecisionExecutor<U> {
    pub fn new(upstream: Arc<U>, timeout: Duration, eligibility: EligibilityConfig) -> Self {
        Self {
            upstream,
            timeout,
            eligibility,
        }
    }

    #[instrument(skip(self, request, cancel))]
    pub async fn run(
        &self,
        request: &DecisionRequest,
        cancel: &CancelSignal,
    ) -> Result<ModelVerdict, StageFailure> {
        if cancel.is_cancelled() {
            return Err(StageFailure::new(
                StageErrorKind::Cancelled,
                "cancelled before dispatch",
            ));
        }

        let inputs = serde_json::json!({
            "form": request.form,
            "bank_extract": request.bank_extract,
            "id_extract": request.id_extract,
        });

        match tokio::time::timeout(self.timeout, self.upstream.decide(&inputs, cancel)).await {
            Err(_) => Err(StageFailure::new(
                StageErrorKind::Timeout,
                format!("decision timed out after {}s", self.timeout.as_secs()),
            )),
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(UpstreamError::Unavailable { message })) => {
                warn!(error = %message, "decision upstream unavailable, applying rule fallback");
                Ok(self.fallback(request))
            }
            Ok(Err(e)) => Err(classify_upstream(e)),
        }
    }

    /// Deterministic verdict from the numeric rule set alone.
    fn fallback(&self, request: &DecisionRequest) -> ModelVerdict {
        let inputs = policy::numeric_inputs_from_extracts(
            request.bank_extract.as_ref(),
            request.id_extract.as_ref(),
        );
        let fused = policy::evaluate(&inputs, None, &self.eligibility);
        ModelVerdict {
            outcome: fused.outcome,
            confidence: fused.confidence,
            reasoning: fused.reasoning,
            benefit_amount: fused.benefit_amount,
        }
    }
}

//! Workflow state machine.

use crate::entities::ApplicationState;
use crate::errors::DomainError;

/// Application state machine.
///
/// Pure and side-effect-free: callers validate a transition here, then persist
/// it through the store's compare-and-set.
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    /// Validate a transition between workflow states.
    ///
    /// `CANCELLED` is reachable from every non-terminal state; user-initiated
    /// cancellation in running states is applied by the engine at the next
    /// safe point. `PROCESSING_FAILED` re-enters the stage it failed from on
    /// explicit retry.
    pub fn validate(
        from: ApplicationState,
        to: ApplicationState,
    ) -> Result<(), DomainError> {
        use ApplicationState::*;

        let ok = match (from, to) {
            (Draft, FormSubmitted) => true,
            (FormSubmitted, DocumentsUploaded) => true,
            (DocumentsUploaded, ScanningDocuments) => true,
            (ScanningDocuments, OcrCompleted) => true,
            (ScanningDocuments, ProcessingFailed) => true,
            (OcrCompleted, Analyzing) => true,
            (OcrCompleted, NeedsReview) => true,
            (Analyzing, AnalysisCompleted) => true,
            (Analyzing, ProcessingFailed) => true,
            (AnalysisCompleted, MakingDecision) => true,
            (AnalysisCompleted, NeedsReview) => true,
            (MakingDecision, DecisionCompleted) => true,
            (MakingDecision, ProcessingFailed) => true,
            (DecisionCompleted, Approved) => true,
            (DecisionCompleted, Rejected) => true,
            (DecisionCompleted, NeedsReview) => true,
            // Explicit retry re-enters the failed stage.
            (ProcessingFailed, ScanningDocuments) => true,
            (ProcessingFailed, Analyzing) => true,
            (ProcessingFailed, MakingDecision) => true,
            // Cancellation from any non-terminal state.
            (s, Cancelled) if !s.is_terminal() => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Validate an administrative reset. Resets may leave any state except
    /// `DRAFT` itself and re-enter `DRAFT` or `FORM_SUBMITTED`.
    pub fn validate_reset(
        from: ApplicationState,
        to: ApplicationState,
    ) -> Result<(), DomainError> {
        use ApplicationState::*;

        if matches!(to, Draft | FormSubmitted) && from != Draft && from != to {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationState::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        let path = [
            Draft,
            FormSubmitted,
            DocumentsUploaded,
            ScanningDocuments,
            OcrCompleted,
            Analyzing,
            AnalysisCompleted,
            MakingDecision,
            DecisionCompleted,
            Approved,
        ];
        for pair in path.windows(2) {
            assert!(
                WorkflowStateMachine::validate(pair[0], pair[1]).is_ok(),
                "expected {:?} -> {:?} to be valid",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn decision_completed_fans_out_to_all_verdicts() {
        for to in [Approved, Rejected, NeedsReview] {
            assert!(WorkflowStateMachine::validate(DecisionCompleted, to).is_ok());
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(WorkflowStateMachine::validate(Draft, DocumentsUploaded).is_err());
        assert!(WorkflowStateMachine::validate(FormSubmitted, ScanningDocuments).is_err());
        assert!(WorkflowStateMachine::validate(ScanningDocuments, Analyzing).is_err());
        assert!(WorkflowStateMachine::validate(OcrCompleted, MakingDecision).is_err());
    }

    #[test]
    fn terminal_states_are_immutable() {
        for from in [Approved, Rejected, NeedsReview, Cancelled] {
            for to in [Draft, FormSubmitted, ScanningDocuments, Cancelled, Approved] {
                assert!(
                    WorkflowStateMachine::validate(from, to).is_err(),
                    "{from:?} -> {to:?} should be invalid"
                );
            }
        }
    }

    #[test]
    fn cancel_allowed_from_every_non_terminal_state() {
        for from in [
            Draft,
            FormSubmitted,
            DocumentsUploaded,
            ScanningDocuments,
            OcrCompleted,
            Analyzing,
            AnalysisCompleted,
            MakingDecision,
            DecisionCompleted,
            ProcessingFailed,
        ] {
            assert!(WorkflowStateMachine::validate(from, Cancelled).is_ok());
        }
    }

    #[test]
    fn retry_reenters_failed_stage_only() {
        assert!(WorkflowStateMachine::validate(ProcessingFailed, ScanningDocuments).is_ok());
        assert!(WorkflowStateMachine::validate(ProcessingFailed, Analyzing).is_ok());
        assert!(WorkflowStateMachine::validate(ProcessingFailed, MakingDecision).is_ok());
        assert!(WorkflowStateMachine::validate(ProcessingFailed, Approved).is_err());
        assert!(WorkflowStateMachine::validate(ProcessingFailed, OcrCompleted).is_err());
    }

    #[test]
    fn reset_reenters_draft_or_form_submitted() {
        assert!(WorkflowStateMachine::validate_reset(Approved, FormSubmitted).is_ok());
        assert!(WorkflowStateMachine::validate_reset(NeedsReview, Draft).is_ok());
        assert!(WorkflowStateMachine::validate_reset(ProcessingFailed, FormSubmitted).is_ok());
        assert!(WorkflowStateMachine::validate_reset(Draft, Draft).is_err());
        assert!(WorkflowStateMachine::validate_reset(Approved, ScanningDocuments).is_err());
    }

    #[test]
    fn progress_is_monotone_along_the_happy_path() {
        let path = [
            Draft,
            FormSubmitted,
            DocumentsUploaded,
            ScanningDocuments,
            OcrCompleted,
            Analyzing,
            AnalysisCompleted,
            MakingDecision,
            DecisionCompleted,
            Approved,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].progress() < pair[1].progress());
        }
    }
}

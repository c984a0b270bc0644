//! Casework domain core.
//!
//! Pure domain logic for the social-assistance eligibility workflow:
//! entities, the workflow state machine, form validation, the stage error
//! taxonomy, and the eligibility decision policy. Nothing here performs I/O.

pub mod entities;
pub mod errors;
pub mod form;
pub mod policy;
pub mod stage;
pub mod state_machine;

pub use entities::{
    ApplicantForm, Application, ApplicationId, ApplicationState, Decision, DecisionOutcome,
    Document, DocumentId, DocumentKind, JobId, Lease, OwnerId, StageRecord, StageStatus, StepId,
    StepStatus, WorkflowStep,
};
pub use errors::DomainError;
pub use form::{validate_form, ApplicantFormInput, FieldError};
pub use policy::{
    evaluate as evaluate_policy, numeric_inputs_from_extracts, rule_verdict, Disagreement,
    EligibilityConfig, FusedDecision, ModelVerdict, NumericInputs,
};
pub use stage::{Stage, StageErrorKind, StageFailure};
pub use state_machine::WorkflowStateMachine;

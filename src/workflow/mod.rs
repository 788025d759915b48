//! The approval-workflow engine: approver resolution, per-step decisions, submission
//! lifecycle and leave settlement, tied together by [`WorkflowOrchestrator`].

pub mod hooks;
pub mod leave;
pub mod ledger;
pub mod orchestrator;
pub mod resolver;
pub mod state_machine;


pub use leave::LeaveApplication;
pub use orchestrator::{
    Actor, DecisionReceipt, FulfillmentArtifact, SubmissionInput, WorkflowOrchestrator,
    WorkflowSettings,
};
pub use state_machine::{Decision, StepOutcome};

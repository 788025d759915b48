//! Side effects run after a workflow transaction has committed.
//!
//! Hooks run in registration order. A failing hook is logged and skipped; it never
//! undoes the transition that triggered it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::state_machine::StepOutcome;
use crate::collab::{AuditEntry, AuditError, AuditSink, CertificateError, CertificateGenerator};
use crate::model::{RequestApprovalAction, RequestSubmission, SubmissionStatus};
use crate::store::{StoreError, WorkflowStore};

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Submitted,
    ActionDecided {
        action: RequestApprovalAction,
        outcome: StepOutcome,
    },
    StepActivated {
        step_index: u32,
        approvers: Vec<u64>,
    },
    /// `from` is `None` when the submission was created directly in `to`.
    StatusChanged {
        from: Option<SubmissionStatus>,
        to: SubmissionStatus,
    },
    Fulfilled {
        path: String,
    },
}

/// An event together with the committed submission it concerns.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub submission: RequestSubmission,
    pub event: WorkflowEvent,
    pub actor_id: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait TransitionHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HookError>;
}

#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl HookChain {
    pub fn new(hooks: Vec<Arc<dyn TransitionHook>>) -> Self {
        Self { hooks }
    }

    pub async fn dispatch(&self, envelopes: &[EventEnvelope]) {
        for envelope in envelopes {
            for hook in &self.hooks {
                if let Err(e) = hook.handle(envelope).await {
                    error!(
                        hook = hook.name(),
                        submission_id = envelope.submission.id,
                        event = ?envelope.event,
                        error = %e,
                        "Workflow hook failed"
                    );
                }
            }
        }
    }
}

/// Writes every event to the audit sink.
pub struct AuditTrailHook {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrailHook {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

const SUBMISSION: &str = "request_submission";
const ACTION: &str = "request_approval_action";

fn audit_entry(envelope: &EventEnvelope) -> AuditEntry {
    let submission = &envelope.submission;
    let mut entry = AuditEntry {
        entity_type: SUBMISSION,
        entity_id: submission.id,
        action: "created",
        field: None,
        old: None,
        new: None,
        actor_id: envelope.actor_id,
        at: envelope.at,
    };

    match &envelope.event {
        WorkflowEvent::Submitted => {
            entry.field = Some("reference_code");
            entry.new = Some(submission.reference_code.clone());
        }
        WorkflowEvent::ActionDecided { action, .. } => {
            entry.entity_type = ACTION;
            entry.entity_id = action.id;
            entry.action = "decided";
            entry.field = Some("status");
            entry.old = Some("pending".to_string());
            entry.new = Some(action.status.to_string());
        }
        WorkflowEvent::StepActivated { step_index, .. } => {
            entry.action = "step_activated";
            entry.field = Some("current_step_index");
            entry.old = step_index.checked_sub(1).map(|i| i.to_string());
            entry.new = Some(step_index.to_string());
        }
        WorkflowEvent::StatusChanged { from, to } => {
            entry.action = "status_changed";
            entry.field = Some("status");
            entry.old = from.map(|s| s.to_string());
            entry.new = Some(to.to_string());
        }
        WorkflowEvent::Fulfilled { path } => {
            entry.action = "fulfilled";
            entry.field = Some("fulfillment_path");
            entry.new = Some(path.clone());
        }
    }

    entry
}

#[async_trait]
impl TransitionHook for AuditTrailHook {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HookError> {
        self.sink.record(audit_entry(envelope)).await?;
        Ok(())
    }
}

/// Issues the certificate of a granted submission and records it in
/// `approval_state`. Skips submissions whose certificate flag is already set.
pub struct CertificateHook {
    generator: Arc<dyn CertificateGenerator>,
    store: Arc<dyn WorkflowStore>,
}

impl CertificateHook {
    pub fn new(generator: Arc<dyn CertificateGenerator>, store: Arc<dyn WorkflowStore>) -> Self {
        Self { generator, store }
    }
}

#[async_trait]
impl TransitionHook for CertificateHook {
    fn name(&self) -> &'static str {
        "certificate"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HookError> {
        let WorkflowEvent::StatusChanged { to, .. } = envelope.event else {
            return Ok(());
        };
        let submission = &envelope.submission;
        if !to.is_granted() || submission.approval_state.certificate_generated {
            return Ok(());
        }

        let path = self.generator.generate(submission).await?;

        let mut uow = self.store.begin().await?;
        let Some(mut current) = uow.lock_submission(submission.id).await? else {
            return Ok(());
        };
        if current.approval_state.certificate_generated {
            debug!(submission_id = current.id, "Certificate already recorded");
            return Ok(());
        }
        current.approval_state.certificate_generated = true;
        current.approval_state.certificate_path = Some(path.clone());
        uow.save_submission(&current).await?;
        uow.commit().await?;

        info!(submission_id = current.id, path = %path, "Certificate generated");
        Ok(())
    }
}

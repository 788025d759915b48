use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::hooks::{EventEnvelope, HookChain, TransitionHook, WorkflowEvent};
use super::leave::{LeaveApplication, LeaveBalanceLedger, LeaveError, leave_details};
use super::ledger::{self, DecisionRecord};
use super::resolver::{ApproverResolver, ResolvedApprover};
use super::state_machine::{
    self, Decision, Progress, StepOutcome, TransitionError, initial_placement,
};
use crate::collab::{FileStore, IdentityProvider, WorkingDayOracle};
use crate::error::WorkflowError;
use crate::model::{
    LeaveBalance, LeaveDetails, NewSubmission, RequestApprovalAction, RequestSubmission,
    RequestType, RequestTypeDraft, SubmissionStatus, submission::generate_reference_code,
};
use crate::store::WorkflowStore;

/// Who is acting. Passed explicitly to every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: u64,
    pub employee_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubmissionInput {
    #[schema(example = 1)]
    pub request_type_id: u64,
    /// Free-form answers to the request form.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub form_data: Value,
    /// Required for, and only accepted by, the leave request type.
    pub leave: Option<LeaveApplication>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowSettings {
    pub leave_request_type_id: Option<u64>,
    pub request_manager_role_id: Option<u64>,
    pub conflict_retries: u32,
    pub enforce_leave_entitlement: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DecisionReceipt {
    #[schema(value_type = String, example = "step_complete")]
    pub outcome: StepOutcome,
    pub submission: RequestSubmission,
    pub action: RequestApprovalAction,
}

#[derive(Debug, Clone)]
pub struct FulfillmentArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Facade over the workflow engine. Every mutation runs in one unit of work, is retried
/// on store conflicts, and dispatches its hooks only after commit.
pub struct WorkflowOrchestrator {
    store: Arc<dyn WorkflowStore>,
    identity: Arc<dyn IdentityProvider>,
    resolver: ApproverResolver,
    calendar: Arc<dyn WorkingDayOracle>,
    files: Arc<dyn FileStore>,
    hooks: HookChain,
    ledger: LeaveBalanceLedger,
    settings: WorkflowSettings,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        identity: Arc<dyn IdentityProvider>,
        calendar: Arc<dyn WorkingDayOracle>,
        files: Arc<dyn FileStore>,
        hooks: Vec<Arc<dyn TransitionHook>>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            resolver: ApproverResolver::new(identity.clone()),
            ledger: LeaveBalanceLedger::new(settings.enforce_leave_entitlement),
            hooks: HookChain::new(hooks),
            store,
            identity,
            calendar,
            files,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /* =========================
    Request types
    ========================= */

    pub async fn create_request_type(
        &self,
        draft: RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, WorkflowError> {
        draft.validate()?;
        let created = self.store.insert_request_type(&draft, now).await?;
        info!(request_type_id = created.id, name = %created.name, "Request type created");
        Ok(created)
    }

    /// Edits a type. Submissions already made keep the steps they were created with.
    pub async fn update_request_type(
        &self,
        id: u64,
        draft: RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, WorkflowError> {
        draft.validate()?;
        if self.request_type(id).await?.is_published {
            self.ensure_fulfillable(&draft.name, draft.steps.is_empty(), draft.has_fulfillment)?;
        }
        let updated = self.store.update_request_type(id, &draft, now).await?;
        info!(request_type_id = id, steps = updated.steps.len(), "Request type updated");
        Ok(updated)
    }

    pub async fn publish_request_type(
        &self,
        id: u64,
        now: DateTime<Utc>,
    ) -> Result<RequestType, WorkflowError> {
        let current = self.request_type(id).await?;
        self.ensure_fulfillable(&current.name, current.steps.is_empty(), current.has_fulfillment)?;
        let published = self.store.publish_request_type(id, now).await?;
        info!(request_type_id = id, "Request type published");
        Ok(published)
    }

    /// A type without steps skips straight to fulfillment, where only the request
    /// manager role can act. Without that role its submissions could never complete.
    fn ensure_fulfillable(
        &self,
        name: &str,
        no_steps: bool,
        has_fulfillment: bool,
    ) -> Result<(), WorkflowError> {
        if no_steps && has_fulfillment && self.settings.request_manager_role_id.is_none() {
            return Err(WorkflowError::Validation(format!(
                "request type '{name}' has no approval steps but needs fulfillment, \
                 and no request manager role is configured to fulfill it"
            )));
        }
        Ok(())
    }

    pub async fn request_type(&self, id: u64) -> Result<RequestType, WorkflowError> {
        self.store
            .request_type(id)
            .await?
            .ok_or(WorkflowError::NotFound {
                entity: "request type",
                id,
            })
    }

    /* =========================
    Submissions
    ========================= */

    #[instrument(
        skip(self, input),
        fields(request_type_id = input.request_type_id, user_id = actor.user_id)
    )]
    pub async fn submit(
        &self,
        actor: Actor,
        input: SubmissionInput,
        now: DateTime<Utc>,
    ) -> Result<RequestSubmission, WorkflowError> {
        let request_type = self.request_type(input.request_type_id).await?;
        if !request_type.is_published {
            return Err(WorkflowError::Validation(format!(
                "request type {} is not published",
                request_type.id
            )));
        }
        self.ensure_fulfillable(
            &request_type.name,
            request_type.steps.is_empty(),
            request_type.has_fulfillment,
        )?;

        let form_data = match input.form_data {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            _ => {
                return Err(WorkflowError::Validation(
                    "form_data must be a JSON object".to_string(),
                ));
            }
        };
        let leave = self.leave_for(&request_type, actor, input.leave.as_ref())?;

        let first_step = match request_type.steps.first() {
            Some(step) => Some(self.resolver.resolve(0, step, actor.user_id).await?),
            None => None,
        };

        let (submission, actions) = self
            .with_retry("submit", || {
                self.submit_once(
                    actor,
                    &request_type,
                    &form_data,
                    leave.as_ref(),
                    first_step.as_deref(),
                    now,
                )
            })
            .await?;

        info!(
            submission_id = submission.id,
            reference_code = %submission.reference_code,
            status = %submission.status,
            "Submission created"
        );

        let mut events = vec![WorkflowEvent::Submitted];
        match submission.current_step_index {
            Some(step_index) => events.push(WorkflowEvent::StepActivated {
                step_index,
                approvers: actions.iter().map(|a| a.approver_id).collect(),
            }),
            None => events.push(WorkflowEvent::StatusChanged {
                from: None,
                to: submission.status,
            }),
        }
        self.dispatch(&submission, events, actor.user_id, now).await;

        Ok(submission)
    }

    fn leave_for(
        &self,
        request_type: &RequestType,
        actor: Actor,
        application: Option<&LeaveApplication>,
    ) -> Result<Option<LeaveDetails>, LeaveError> {
        let is_leave_type = self.settings.leave_request_type_id == Some(request_type.id);

        match (is_leave_type, application) {
            (true, Some(application)) => {
                let employee_id = actor.employee_id.ok_or(LeaveError::MissingEmployee)?;
                leave_details(employee_id, application, self.calendar.as_ref()).map(Some)
            }
            (true, None) => Err(LeaveError::MissingApplication),
            (false, Some(_)) => Err(LeaveError::UnexpectedApplication(request_type.id)),
            (false, None) => Ok(None),
        }
    }

    async fn submit_once(
        &self,
        actor: Actor,
        request_type: &RequestType,
        form_data: &Value,
        leave: Option<&LeaveDetails>,
        first_step: Option<&[ResolvedApprover]>,
        now: DateTime<Utc>,
    ) -> Result<(RequestSubmission, Vec<RequestApprovalAction>), WorkflowError> {
        let (status, current_step_index) =
            initial_placement(request_type.steps.len(), request_type.has_fulfillment);

        let mut uow = self.store.begin().await?;
        let mut submission = uow
            .insert_submission(NewSubmission {
                request_type_id: request_type.id,
                requester_id: actor.user_id,
                reference_code: generate_reference_code(now),
                status,
                current_step_index,
                steps: request_type.steps.clone(),
                has_fulfillment: request_type.has_fulfillment,
                form_data: form_data.clone(),
                leave: leave.cloned(),
                approval_state: Default::default(),
                created_at: now,
            })
            .await?;

        let actions = match first_step {
            Some(approvers) => {
                ledger::materialize_step(uow.as_mut(), &submission, 0, approvers, now).await?
            }
            None => Vec::new(),
        };

        if self.ledger.settle(uow.as_mut(), &mut submission, now).await? {
            uow.save_submission(&submission).await?;
        }
        uow.commit().await?;

        Ok((submission, actions))
    }

    /* =========================
    Decisions
    ========================= */

    #[instrument(skip(self, notes), fields(user_id = actor.user_id))]
    pub async fn decide(
        &self,
        action_id: u64,
        decision: Decision,
        actor: Actor,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionReceipt, WorkflowError> {
        let (receipt, events) = self
            .with_retry("decide", || {
                self.decide_once(action_id, decision, actor, notes.clone(), now)
            })
            .await?;

        info!(
            submission_id = receipt.submission.id,
            action_id,
            ?decision,
            outcome = ?receipt.outcome,
            status = %receipt.submission.status,
            "Approval decision recorded"
        );
        self.dispatch(&receipt.submission, events, actor.user_id, now)
            .await;

        Ok(receipt)
    }

    async fn decide_once(
        &self,
        action_id: u64,
        decision: Decision,
        actor: Actor,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(DecisionReceipt, Vec<WorkflowEvent>), WorkflowError> {
        let mut uow = self.store.begin().await?;
        let DecisionRecord {
            mut submission,
            action,
            outcome,
        } = ledger::record_decision(uow.as_mut(), action_id, decision, actor.user_id, notes, now)
            .await?;

        let previous = submission.status;
        let mut events = vec![WorkflowEvent::ActionDecided {
            action: action.clone(),
            outcome,
        }];

        match outcome {
            StepOutcome::StepNotYetComplete => {}
            StepOutcome::SubmissionRejected => {
                state_machine::transition(&mut submission, SubmissionStatus::Rejected, now)?;
            }
            StepOutcome::StepComplete => {
                match state_machine::progress_after_step(&submission, action.step_index)? {
                    Progress::Advance { next_step } => {
                        let step = submission.step(next_step).cloned().ok_or(
                            TransitionError::NoActiveStep {
                                current: submission.current_step_index,
                            },
                        )?;
                        // Resolved now, against the organisation as it is today.
                        let approvers = self
                            .resolver
                            .resolve(next_step, &step, submission.requester_id)
                            .await?;
                        state_machine::advance_to_step(&mut submission, next_step, now)?;
                        let created = ledger::materialize_step(
                            uow.as_mut(),
                            &submission,
                            next_step,
                            &approvers,
                            now,
                        )
                        .await?;
                        events.push(WorkflowEvent::StepActivated {
                            step_index: next_step,
                            approvers: created.iter().map(|a| a.approver_id).collect(),
                        });
                    }
                    Progress::Finish { status } => {
                        state_machine::transition(&mut submission, status, now)?;
                    }
                }
            }
        }

        if submission.status != previous {
            self.ledger.settle(uow.as_mut(), &mut submission, now).await?;
            events.push(WorkflowEvent::StatusChanged {
                from: Some(previous),
                to: submission.status,
            });
        }
        if outcome != StepOutcome::StepNotYetComplete {
            uow.save_submission(&submission).await?;
        }
        uow.commit().await?;

        Ok((
            DecisionReceipt {
                outcome,
                submission,
                action,
            },
            events,
        ))
    }

    /* =========================
    Fulfillment
    ========================= */

    /// Attaches the deliverable of a submission awaiting fulfillment and completes it.
    /// Allowed for approvers of the final step and for holders of the request manager
    /// role.
    #[instrument(
        skip(self, artifact),
        fields(user_id = actor.user_id, filename = %artifact.filename)
    )]
    pub async fn fulfill(
        &self,
        submission_id: u64,
        actor: Actor,
        artifact: FulfillmentArtifact,
        now: DateTime<Utc>,
    ) -> Result<RequestSubmission, WorkflowError> {
        let submission = self.submission(submission_id).await?;
        if submission.status != SubmissionStatus::Fulfillment {
            return Err(WorkflowError::NotAwaitingFulfillment {
                submission_id,
                status: submission.status,
            });
        }
        self.ensure_fulfiller(&submission, actor).await?;

        let path = self.files.store(&artifact.bytes, &artifact.filename).await?;

        let submission = match self
            .with_retry("fulfill", || self.fulfill_once(submission_id, &path, now))
            .await
        {
            Ok(submission) => submission,
            Err(e) => {
                // Nothing references the artifact once the transition is abandoned.
                if let Err(remove_err) = self.files.remove(&path).await {
                    warn!(
                        submission_id,
                        path = %path,
                        error = %remove_err,
                        "Orphaned fulfillment artifact"
                    );
                }
                return Err(e);
            }
        };

        info!(submission_id, path = %path, "Submission fulfilled");
        self.dispatch(
            &submission,
            vec![
                WorkflowEvent::Fulfilled { path },
                WorkflowEvent::StatusChanged {
                    from: Some(SubmissionStatus::Fulfillment),
                    to: SubmissionStatus::Completed,
                },
            ],
            actor.user_id,
            now,
        )
        .await;

        Ok(submission)
    }

    async fn ensure_fulfiller(
        &self,
        submission: &RequestSubmission,
        actor: Actor,
    ) -> Result<(), WorkflowError> {
        if let Some(last) = submission.last_step_index() {
            let actions = self.store.actions_for_submission(submission.id).await?;
            if actions
                .iter()
                .any(|a| a.step_index == last && a.approver_id == actor.user_id)
            {
                return Ok(());
            }
        }

        if let Some(role_id) = self.settings.request_manager_role_id {
            if self.identity.user_has_role(actor.user_id, role_id).await? {
                return Ok(());
            }
        }

        Err(WorkflowError::FulfillmentNotAllowed {
            submission_id: submission.id,
            user_id: actor.user_id,
        })
    }

    async fn fulfill_once(
        &self,
        submission_id: u64,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<RequestSubmission, WorkflowError> {
        let mut uow = self.store.begin().await?;
        let mut submission =
            uow.lock_submission(submission_id)
                .await?
                .ok_or(WorkflowError::NotFound {
                    entity: "submission",
                    id: submission_id,
                })?;
        if submission.status != SubmissionStatus::Fulfillment {
            return Err(WorkflowError::NotAwaitingFulfillment {
                submission_id,
                status: submission.status,
            });
        }

        state_machine::transition(&mut submission, SubmissionStatus::Completed, now)?;
        submission.fulfillment_path = Some(path.to_string());
        self.ledger.settle(uow.as_mut(), &mut submission, now).await?;
        uow.save_submission(&submission).await?;
        uow.commit().await?;

        Ok(submission)
    }

    /* =========================
    Leave settlement
    ========================= */

    /// Re-applies the balance movement implied by the submission's current status.
    /// Returns `false` when it had already been applied.
    #[instrument(skip(self))]
    pub async fn replay_leave_settlement(
        &self,
        submission_id: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        let moved = self
            .with_retry("replay_leave_settlement", || {
                self.replay_once(submission_id, now)
            })
            .await?;

        if !moved {
            debug!(submission_id, "Leave settlement already applied");
        }
        Ok(moved)
    }

    async fn replay_once(
        &self,
        submission_id: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        let mut uow = self.store.begin().await?;
        let mut submission =
            uow.lock_submission(submission_id)
                .await?
                .ok_or(WorkflowError::NotFound {
                    entity: "submission",
                    id: submission_id,
                })?;

        let moved = self.ledger.settle(uow.as_mut(), &mut submission, now).await?;
        if moved {
            uow.save_submission(&submission).await?;
            uow.commit().await?;
        }
        Ok(moved)
    }

    /* =========================
    Queries
    ========================= */

    pub async fn submission(&self, id: u64) -> Result<RequestSubmission, WorkflowError> {
        self.store
            .submission(id)
            .await?
            .ok_or(WorkflowError::NotFound {
                entity: "submission",
                id,
            })
    }

    pub async fn submission_with_actions(
        &self,
        id: u64,
    ) -> Result<(RequestSubmission, Vec<RequestApprovalAction>), WorkflowError> {
        let submission = self.submission(id).await?;
        let actions = self.store.actions_for_submission(id).await?;
        Ok((submission, actions))
    }

    pub async fn pending_actions(
        &self,
        approver_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, WorkflowError> {
        Ok(self.store.pending_actions_for(approver_id).await?)
    }

    pub async fn leave_balances(
        &self,
        employee_id: u64,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, WorkflowError> {
        Ok(self.store.leave_balances(employee_id, year).await?)
    }

    /* =========================
    Plumbing
    ========================= */

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() => {
                    if retries >= self.settings.conflict_retries {
                        warn!(operation, retries, "Giving up after repeated conflicts");
                        return Err(WorkflowError::TryAgain);
                    }
                    retries += 1;
                    debug!(operation, retries, "Conflict, retrying");
                }
                other => return other,
            }
        }
    }

    async fn dispatch(
        &self,
        submission: &RequestSubmission,
        events: Vec<WorkflowEvent>,
        actor_id: u64,
        at: DateTime<Utc>,
    ) {
        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .map(|event| EventEnvelope {
                submission: submission.clone(),
                event,
                actor_id,
                at,
            })
            .collect();
        self.hooks.dispatch(&envelopes).await;
    }
}

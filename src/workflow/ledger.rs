//! Per-approver decisions on the active step.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::resolver::ResolvedApprover;
use super::state_machine::{Decision, StepOutcome};
use crate::model::{
    ActionStatus, NewApprovalAction, RequestApprovalAction, RequestSubmission, SubmissionStatus,
};
use crate::store::{StoreError, UnitOfWork};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("approval action {action_id} not found")]
    NotFound { action_id: u64 },
    #[error("approval action {action_id} was already {status}")]
    NotPending { action_id: u64, status: ActionStatus },
    #[error("user {actor_id} may not decide approval action {action_id}")]
    NotAuthorized { action_id: u64, actor_id: u64 },
    #[error("submission {submission_id} is {status} and accepts no more decisions")]
    SubmissionClosed {
        submission_id: u64,
        status: SubmissionStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`record_decision`]: the locked submission, the updated action and what
/// the decision did to the step.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub submission: RequestSubmission,
    pub action: RequestApprovalAction,
    pub outcome: StepOutcome,
}

/// Records one approver's decision.
///
/// The first read only finds the owning submission. Everything after it is read under
/// the submission lock with locking reads, so that of two approvers racing on the last
/// open slots of a step exactly one observes [`StepOutcome::StepComplete`].
pub async fn record_decision(
    uow: &mut dyn UnitOfWork,
    action_id: u64,
    decision: Decision,
    actor_id: u64,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<DecisionRecord, ActionError> {
    let submission_id = uow
        .action(action_id)
        .await?
        .ok_or(ActionError::NotFound { action_id })?
        .submission_id;

    let submission = uow
        .lock_submission(submission_id)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "submission",
            id: submission_id,
        })?;
    let mut action = uow
        .lock_action(action_id)
        .await?
        .ok_or(ActionError::NotFound { action_id })?;

    if submission.status != SubmissionStatus::Pending {
        return Err(ActionError::SubmissionClosed {
            submission_id,
            status: submission.status,
        });
    }
    if action.approver_id != actor_id {
        return Err(ActionError::NotAuthorized {
            action_id,
            actor_id,
        });
    }
    if action.status != ActionStatus::Pending {
        return Err(ActionError::NotPending {
            action_id,
            status: action.status,
        });
    }
    // Only the active step takes decisions.
    if submission.current_step_index != Some(action.step_index) {
        return Err(ActionError::NotAuthorized {
            action_id,
            actor_id,
        });
    }

    action.status = match decision {
        Decision::Approve => ActionStatus::Approved,
        Decision::Reject => ActionStatus::Rejected,
    };
    action.acted_at = Some(now);
    action.notes = notes;
    uow.save_action(&action).await?;

    let outcome = match decision {
        Decision::Reject => StepOutcome::SubmissionRejected,
        Decision::Approve => {
            let siblings = uow
                .lock_step_actions(submission_id, action.step_index)
                .await?;
            if siblings.iter().all(|a| a.status == ActionStatus::Approved) {
                StepOutcome::StepComplete
            } else {
                StepOutcome::StepNotYetComplete
            }
        }
    };

    debug!(
        submission_id,
        action_id,
        step_index = action.step_index,
        ?outcome,
        "Recorded approval decision"
    );
    Ok(DecisionRecord {
        submission,
        action,
        outcome,
    })
}

/// Freezes the resolved approvers of a step into pending action rows.
pub async fn materialize_step(
    uow: &mut dyn UnitOfWork,
    submission: &RequestSubmission,
    step_index: u32,
    approvers: &[ResolvedApprover],
    now: DateTime<Utc>,
) -> Result<Vec<RequestApprovalAction>, StoreError> {
    let rows = approvers
        .iter()
        .map(|approver| NewApprovalAction {
            submission_id: submission.id,
            step_index,
            approver_id: approver.user_id,
            via_role_id: approver.source.role_id(),
            via_position_id: approver.source.position_id(),
            created_at: now,
        })
        .collect();

    uow.insert_actions(rows).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::model::{
        ApprovalStepDef, ApproverSpec, BalanceKey, LeaveBalance, LeaveRequest,
        LeaveRequestStatus, NewSubmission,
    };
    use crate::store::{MemoryStore, WorkflowStore};
    use crate::testing::at;
    use serde_json::json;

    async fn seeded(store: &MemoryStore, approvers: &[u64]) -> (u64, Vec<RequestApprovalAction>) {
        let mut uow = store.begin().await.unwrap();
        let submission = uow
            .insert_submission(NewSubmission {
                request_type_id: 1,
                requester_id: 100,
                reference_code: "REQ-20260302-00001".to_string(),
                status: SubmissionStatus::Pending,
                current_step_index: Some(0),
                steps: vec![
                    ApprovalStepDef {
                        name: "Reviewers".to_string(),
                        approvers: approvers
                            .iter()
                            .map(|id| ApproverSpec::User { id: *id })
                            .collect(),
                    },
                    ApprovalStepDef {
                        name: "Director".to_string(),
                        approvers: vec![ApproverSpec::User { id: 50 }],
                    },
                ],
                has_fulfillment: false,
                form_data: json!({}),
                leave: None,
                approval_state: Default::default(),
                created_at: at(2026, 3, 2),
            })
            .await
            .unwrap();

        let resolved: Vec<ResolvedApprover> = approvers
            .iter()
            .map(|id| ResolvedApprover {
                user_id: *id,
                source: ApproverSpec::User { id: *id },
            })
            .collect();
        let actions = materialize_step(uow.as_mut(), &submission, 0, &resolved, at(2026, 3, 2))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        (submission.id, actions)
    }

    async fn decide(
        uow: &mut dyn UnitOfWork,
        action_id: u64,
        decision: Decision,
        actor_id: u64,
    ) -> Result<DecisionRecord, ActionError> {
        record_decision(uow, action_id, decision, actor_id, None, at(2026, 3, 3)).await
    }

    /// Serves unlocked action reads from a snapshot taken before other transactions
    /// committed, the way InnoDB does under REPEATABLE READ. Locking reads pass through.
    struct SnapshotReads {
        inner: Box<dyn UnitOfWork>,
        snapshot: HashMap<u64, RequestApprovalAction>,
    }

    impl SnapshotReads {
        fn new(inner: Box<dyn UnitOfWork>, snapshot: Vec<RequestApprovalAction>) -> Self {
            Self {
                inner,
                snapshot: snapshot.into_iter().map(|a| (a.id, a)).collect(),
            }
        }
    }

    #[async_trait]
    impl UnitOfWork for SnapshotReads {
        async fn insert_submission(
            &mut self,
            new: NewSubmission,
        ) -> Result<RequestSubmission, StoreError> {
            self.inner.insert_submission(new).await
        }

        async fn lock_submission(
            &mut self,
            id: u64,
        ) -> Result<Option<RequestSubmission>, StoreError> {
            self.inner.lock_submission(id).await
        }

        async fn save_submission(
            &mut self,
            submission: &RequestSubmission,
        ) -> Result<(), StoreError> {
            self.inner.save_submission(submission).await
        }

        async fn action(
            &mut self,
            id: u64,
        ) -> Result<Option<RequestApprovalAction>, StoreError> {
            Ok(self.snapshot.get(&id).cloned())
        }

        async fn lock_action(
            &mut self,
            id: u64,
        ) -> Result<Option<RequestApprovalAction>, StoreError> {
            self.inner.lock_action(id).await
        }

        async fn lock_step_actions(
            &mut self,
            submission_id: u64,
            step_index: u32,
        ) -> Result<Vec<RequestApprovalAction>, StoreError> {
            self.inner.lock_step_actions(submission_id, step_index).await
        }

        async fn insert_actions(
            &mut self,
            actions: Vec<NewApprovalAction>,
        ) -> Result<Vec<RequestApprovalAction>, StoreError> {
            self.inner.insert_actions(actions).await
        }

        async fn save_action(&mut self, action: &RequestApprovalAction) -> Result<(), StoreError> {
            self.inner.save_action(action).await
        }

        async fn lock_leave_balance(
            &mut self,
            key: BalanceKey,
        ) -> Result<LeaveBalance, StoreError> {
            self.inner.lock_leave_balance(key).await
        }

        async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<(), StoreError> {
            self.inner.save_leave_balance(balance).await
        }

        async fn lock_leave_request_for(
            &mut self,
            submission_id: u64,
        ) -> Result<Option<LeaveRequest>, StoreError> {
            self.inner.lock_leave_request_for(submission_id).await
        }

        async fn insert_leave_request(
            &mut self,
            submission: &RequestSubmission,
            status: LeaveRequestStatus,
            now: DateTime<Utc>,
        ) -> Result<LeaveRequest, StoreError> {
            self.inner.insert_leave_request(submission, status, now).await
        }

        async fn set_leave_request_status(
            &mut self,
            id: u64,
            status: LeaveRequestStatus,
        ) -> Result<(), StoreError> {
            self.inner.set_leave_request_status(id, status).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.commit().await
        }
    }

    #[actix_web::test]
    async fn step_completes_only_with_the_last_approval() {
        let store = MemoryStore::new();
        let (_, actions) = seeded(&store, &[11, 12]).await;

        let mut uow = store.begin().await.unwrap();
        let first = decide(uow.as_mut(), actions[0].id, Decision::Approve, 11)
            .await
            .unwrap();
        let second = record_decision(
            uow.as_mut(),
            actions[1].id,
            Decision::Approve,
            12,
            Some("ok".to_string()),
            at(2026, 3, 3),
        )
        .await
        .unwrap();

        assert_eq!(first.outcome, StepOutcome::StepNotYetComplete);
        assert_eq!(second.outcome, StepOutcome::StepComplete);
        assert_eq!(second.action.notes.as_deref(), Some("ok"));
        assert_eq!(second.action.acted_at, Some(at(2026, 3, 3)));
    }

    #[actix_web::test]
    async fn approval_racing_a_committed_sibling_still_closes_the_step() {
        let store = MemoryStore::new();
        let (submission_id, actions) = seeded(&store, &[11, 12]).await;
        // What user 12's transaction saw before user 11 committed.
        let stale = store.actions_for_submission(submission_id).await.unwrap();
        assert!(stale.iter().all(|a| a.status == ActionStatus::Pending));

        let mut first = store.begin().await.unwrap();
        let early = decide(first.as_mut(), actions[0].id, Decision::Approve, 11)
            .await
            .unwrap();
        first.commit().await.unwrap();

        let mut second = SnapshotReads::new(store.begin().await.unwrap(), stale);
        let late = decide(&mut second, actions[1].id, Decision::Approve, 12)
            .await
            .unwrap();

        assert_eq!(early.outcome, StepOutcome::StepNotYetComplete);
        assert_eq!(late.outcome, StepOutcome::StepComplete);
    }

    #[actix_web::test]
    async fn stale_snapshot_does_not_hide_an_earlier_decision() {
        let store = MemoryStore::new();
        let (submission_id, actions) = seeded(&store, &[11, 12]).await;
        let stale = store.actions_for_submission(submission_id).await.unwrap();

        let mut first = store.begin().await.unwrap();
        decide(first.as_mut(), actions[0].id, Decision::Approve, 11)
            .await
            .unwrap();
        first.commit().await.unwrap();

        let mut retry = SnapshotReads::new(store.begin().await.unwrap(), stale);
        let err = decide(&mut retry, actions[0].id, Decision::Approve, 11)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::NotPending {
                status: ActionStatus::Approved,
                ..
            }
        ));
    }

    #[actix_web::test]
    async fn only_the_bound_approver_may_decide() {
        let store = MemoryStore::new();
        let (_, actions) = seeded(&store, &[11]).await;

        let mut uow = store.begin().await.unwrap();
        let err = decide(uow.as_mut(), actions[0].id, Decision::Approve, 12)
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::NotAuthorized { actor_id: 12, .. }));
    }

    #[actix_web::test]
    async fn second_decision_on_the_same_action_is_not_pending() {
        let store = MemoryStore::new();
        let (_, actions) = seeded(&store, &[11, 12]).await;

        let mut uow = store.begin().await.unwrap();
        decide(uow.as_mut(), actions[0].id, Decision::Approve, 11)
            .await
            .unwrap();
        let err = decide(uow.as_mut(), actions[0].id, Decision::Reject, 11)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::NotPending {
                status: ActionStatus::Approved,
                ..
            }
        ));
    }

    #[actix_web::test]
    async fn reject_is_reported_immediately() {
        let store = MemoryStore::new();
        let (_, actions) = seeded(&store, &[11, 12]).await;

        let mut uow = store.begin().await.unwrap();
        let record = decide(uow.as_mut(), actions[1].id, Decision::Reject, 12)
            .await
            .unwrap();

        assert_eq!(record.outcome, StepOutcome::SubmissionRejected);
        assert_eq!(record.action.status, ActionStatus::Rejected);
    }

    #[actix_web::test]
    async fn materialized_actions_remember_their_source() {
        let store = MemoryStore::new();
        let (submission_id, _) = seeded(&store, &[11]).await;

        let mut uow = store.begin().await.unwrap();
        let submission = uow.lock_submission(submission_id).await.unwrap().unwrap();
        let rows = materialize_step(
            uow.as_mut(),
            &submission,
            1,
            &[ResolvedApprover {
                user_id: 77,
                source: ApproverSpec::Position { id: 3 },
            }],
            at(2026, 3, 4),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].via_position_id, Some(3));
        assert_eq!(rows[0].via_role_id, None);
        assert_eq!(rows[0].status, ActionStatus::Pending);
    }
}

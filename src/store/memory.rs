//! In-process store. Each unit of work holds the whole-store mutex from `begin` to
//! commit, so transactions are fully serialized; writes go to a working copy that only
//! replaces the shared state on commit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StoreError, UnitOfWork, WorkflowStore};
use crate::model::{
    ActionStatus, BalanceKey, LeaveBalance, LeaveRequest, LeaveRequestStatus,
    NewApprovalAction, NewSubmission, RequestApprovalAction, RequestSubmission, RequestType,
    RequestTypeDraft, SubmissionStatus,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: u64,
    request_types: BTreeMap<u64, RequestType>,
    submissions: BTreeMap<u64, RequestSubmission>,
    actions: BTreeMap<u64, RequestApprovalAction>,
    balances: BTreeMap<BalanceKey, LeaveBalance>,
    leave_requests: BTreeMap<u64, LeaveRequest>,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with [`StoreError::Conflict`].
    pub fn fail_next_commits(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Overwrites a balance row as an HR import would.
    pub async fn put_leave_balance(&self, mut balance: LeaveBalance) {
        balance.recompute();
        self.state.lock().await.balances.insert(balance.key(), balance);
    }

    pub async fn leave_balance(&self, key: BalanceKey) -> Option<LeaveBalance> {
        self.state.lock().await.balances.get(&key).cloned()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            injected_conflicts: self.injected_conflicts.clone(),
        }))
    }

    async fn request_type(&self, id: u64) -> Result<Option<RequestType>, StoreError> {
        Ok(self.state.lock().await.request_types.get(&id).cloned())
    }

    async fn insert_request_type(
        &self,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let request_type = RequestType {
            id,
            name: draft.name.clone(),
            has_fulfillment: draft.has_fulfillment,
            steps: draft.steps.clone(),
            is_published: false,
            created_at: now,
            updated_at: now,
        };
        state.request_types.insert(id, request_type.clone());
        Ok(request_type)
    }

    async fn update_request_type(
        &self,
        id: u64,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        let mut state = self.state.lock().await;
        let request_type = state
            .request_types
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "request type",
                id,
            })?;
        request_type.name = draft.name.clone();
        request_type.has_fulfillment = draft.has_fulfillment;
        request_type.steps = draft.steps.clone();
        request_type.updated_at = now;
        Ok(request_type.clone())
    }

    async fn publish_request_type(
        &self,
        id: u64,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        let mut state = self.state.lock().await;
        let request_type = state
            .request_types
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "request type",
                id,
            })?;
        request_type.is_published = true;
        request_type.updated_at = now;
        Ok(request_type.clone())
    }

    async fn submission(&self, id: u64) -> Result<Option<RequestSubmission>, StoreError> {
        Ok(self.state.lock().await.submissions.get(&id).cloned())
    }

    async fn actions_for_submission(
        &self,
        submission_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|action| action.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn pending_actions_for(
        &self,
        approver_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|action| {
                action.approver_id == approver_id && action.status == ActionStatus::Pending
            })
            .filter(|action| {
                state.submissions.get(&action.submission_id).is_some_and(|s| {
                    s.status == SubmissionStatus::Pending
                        && s.current_step_index == Some(action.step_index)
                })
            })
            .cloned()
            .collect())
    }

    async fn leave_balances(
        &self,
        employee_id: u64,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .values()
            .filter(|b| b.employee_id == employee_id && b.year == year)
            .cloned()
            .collect())
    }

    async fn leave_request_for(
        &self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .leave_requests
            .values()
            .find(|r| r.submission_id == submission_id)
            .cloned())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    injected_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_submission(
        &mut self,
        new: NewSubmission,
    ) -> Result<RequestSubmission, StoreError> {
        if self
            .working
            .submissions
            .values()
            .any(|s| s.reference_code == new.reference_code)
        {
            return Err(StoreError::Conflict);
        }

        let id = self.working.next_id();
        let submission = RequestSubmission {
            id,
            request_type_id: new.request_type_id,
            requester_id: new.requester_id,
            reference_code: new.reference_code,
            status: new.status,
            current_step_index: new.current_step_index,
            steps: new.steps,
            has_fulfillment: new.has_fulfillment,
            form_data: new.form_data,
            leave: new.leave,
            approval_state: new.approval_state,
            fulfillment_path: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        self.working.submissions.insert(id, submission.clone());
        Ok(submission)
    }

    async fn lock_submission(
        &mut self,
        id: u64,
    ) -> Result<Option<RequestSubmission>, StoreError> {
        Ok(self.working.submissions.get(&id).cloned())
    }

    async fn save_submission(&mut self, submission: &RequestSubmission) -> Result<(), StoreError> {
        let slot = self
            .working
            .submissions
            .get_mut(&submission.id)
            .ok_or(StoreError::NotFound {
                entity: "submission",
                id: submission.id,
            })?;
        *slot = submission.clone();
        Ok(())
    }

    async fn action(&mut self, id: u64) -> Result<Option<RequestApprovalAction>, StoreError> {
        Ok(self.working.actions.get(&id).cloned())
    }

    // The store-wide guard already serializes units of work.
    async fn lock_action(
        &mut self,
        id: u64,
    ) -> Result<Option<RequestApprovalAction>, StoreError> {
        self.action(id).await
    }

    async fn lock_step_actions(
        &mut self,
        submission_id: u64,
        step_index: u32,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        Ok(self
            .working
            .actions
            .values()
            .filter(|a| a.submission_id == submission_id && a.step_index == step_index)
            .cloned()
            .collect())
    }

    async fn insert_actions(
        &mut self,
        actions: Vec<NewApprovalAction>,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let mut inserted = Vec::with_capacity(actions.len());
        for new in actions {
            let id = self.working.next_id();
            let action = RequestApprovalAction {
                id,
                submission_id: new.submission_id,
                step_index: new.step_index,
                approver_id: new.approver_id,
                via_role_id: new.via_role_id,
                via_position_id: new.via_position_id,
                status: ActionStatus::Pending,
                acted_at: None,
                notes: None,
                created_at: new.created_at,
            };
            self.working.actions.insert(id, action.clone());
            inserted.push(action);
        }
        Ok(inserted)
    }

    async fn save_action(&mut self, action: &RequestApprovalAction) -> Result<(), StoreError> {
        let slot = self
            .working
            .actions
            .get_mut(&action.id)
            .ok_or(StoreError::NotFound {
                entity: "approval action",
                id: action.id,
            })?;
        *slot = action.clone();
        Ok(())
    }

    async fn lock_leave_balance(&mut self, key: BalanceKey) -> Result<LeaveBalance, StoreError> {
        Ok(self
            .working
            .balances
            .entry(key)
            .or_insert_with(|| LeaveBalance::zeroed(key))
            .clone())
    }

    async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<(), StoreError> {
        self.working.balances.insert(balance.key(), balance.clone());
        Ok(())
    }

    async fn lock_leave_request_for(
        &mut self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError> {
        Ok(self
            .working
            .leave_requests
            .values()
            .find(|r| r.submission_id == submission_id)
            .cloned())
    }

    async fn insert_leave_request(
        &mut self,
        submission: &RequestSubmission,
        status: LeaveRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<LeaveRequest, StoreError> {
        let leave = submission.leave.as_ref().ok_or_else(|| StoreError::Corrupt {
            entity: "submission",
            reason: format!("submission {} carries no leave details", submission.id),
        })?;
        if self
            .working
            .leave_requests
            .values()
            .any(|r| r.submission_id == submission.id)
        {
            return Err(StoreError::Conflict);
        }

        let id = self.working.next_id();
        let request = LeaveRequest {
            id,
            submission_id: submission.id,
            employee_id: leave.employee_id,
            leave_type_id: leave.leave_type_id,
            start_date: leave.start_date,
            end_date: leave.end_date,
            days: leave.days,
            status,
            created_at: now,
        };
        self.working.leave_requests.insert(id, request.clone());
        Ok(request)
    }

    async fn set_leave_request_status(
        &mut self,
        id: u64,
        status: LeaveRequestStatus,
    ) -> Result<(), StoreError> {
        let request = self
            .working
            .leave_requests
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "leave request",
                id,
            })?;
        request.status = status;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict);
        }

        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

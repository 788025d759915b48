//! Transactional persistence for the workflow engine.
//!
//! Every workflow operation opens one [`UnitOfWork`], reads what it needs under row
//! locks, writes, and commits. Dropping a unit of work without committing rolls it back.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;

use crate::model::{
    BalanceKey, LeaveBalance, LeaveRequest, LeaveRequestStatus, NewApprovalAction,
    NewSubmission, RequestApprovalAction, RequestSubmission, RequestType, RequestTypeDraft,
};
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lost a race on a lock or unique key; the whole unit of work may be retried.
    #[error("concurrent modification, retry the operation")]
    Conflict,
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("stored {entity} is malformed: {reason}")]
    Corrupt { entity: &'static str, reason: String },
    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

/// Entry point to the data store. Reads here are unlocked snapshots for queries; every
/// mutation goes through [`WorkflowStore::begin`].
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn request_type(&self, id: u64) -> Result<Option<RequestType>, StoreError>;

    async fn insert_request_type(
        &self,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError>;

    async fn update_request_type(
        &self,
        id: u64,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError>;

    async fn publish_request_type(
        &self,
        id: u64,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError>;

    async fn submission(&self, id: u64) -> Result<Option<RequestSubmission>, StoreError>;

    async fn actions_for_submission(
        &self,
        submission_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError>;

    /// Pending actions bound to `approver_id` on submissions that are still open.
    async fn pending_actions_for(
        &self,
        approver_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError>;

    async fn leave_balances(
        &self,
        employee_id: u64,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, StoreError>;

    async fn leave_request_for(
        &self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError>;
}

/// One atomic transaction. Lock order is submission row, then its action rows, then
/// balance rows.
///
/// MySQL runs it at InnoDB's default REPEATABLE READ. Plain reads come from the snapshot
/// taken by the first read of the transaction and may predate commits that finished
/// while this unit of work waited for a lock. Anything a decision depends on is read
/// through a `lock_*` method, which always sees the latest committed row.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_submission(
        &mut self,
        new: NewSubmission,
    ) -> Result<RequestSubmission, StoreError>;

    /// Reads the submission and holds its row lock until commit or rollback.
    async fn lock_submission(&mut self, id: u64)
    -> Result<Option<RequestSubmission>, StoreError>;

    async fn save_submission(&mut self, submission: &RequestSubmission) -> Result<(), StoreError>;

    /// Unlocked snapshot read. Only the columns fixed at creation (`submission_id`,
    /// `step_index`, `approver_id`) can be trusted from it.
    async fn action(&mut self, id: u64) -> Result<Option<RequestApprovalAction>, StoreError>;

    /// Reads the action under lock. Take the submission lock first.
    async fn lock_action(&mut self, id: u64)
    -> Result<Option<RequestApprovalAction>, StoreError>;

    /// Reads every action of one step under lock. Take the submission lock first.
    async fn lock_step_actions(
        &mut self,
        submission_id: u64,
        step_index: u32,
    ) -> Result<Vec<RequestApprovalAction>, StoreError>;

    async fn insert_actions(
        &mut self,
        actions: Vec<NewApprovalAction>,
    ) -> Result<Vec<RequestApprovalAction>, StoreError>;

    async fn save_action(&mut self, action: &RequestApprovalAction) -> Result<(), StoreError>;

    /// Reads the balance row under lock, creating it zeroed when it does not exist yet.
    async fn lock_leave_balance(&mut self, key: BalanceKey) -> Result<LeaveBalance, StoreError>;

    async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<(), StoreError>;

    /// Reads the leave snapshot of a submission under lock.
    async fn lock_leave_request_for(
        &mut self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError>;

    async fn insert_leave_request(
        &mut self,
        submission: &RequestSubmission,
        status: LeaveRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<LeaveRequest, StoreError>;

    async fn set_leave_request_status(
        &mut self,
        id: u64,
        status: LeaveRequestStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

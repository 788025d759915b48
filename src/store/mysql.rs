use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlDatabaseError};
use sqlx::types::Json;
use sqlx::{FromRow, MySqlPool, Transaction};

use super::{StoreError, UnitOfWork, WorkflowStore};
use crate::model::{
    ActionStatus, ApprovalState, ApprovalStepDef, BalanceKey, LeaveBalance, LeaveDetails,
    LeaveRequest, LeaveRequestStatus, NewApprovalAction, NewSubmission, RequestApprovalAction,
    RequestSubmission, RequestType, RequestTypeDraft, SubmissionStatus,
};

/// MySQL error numbers that mean "lost a race, run it again".
const ER_DUP_ENTRY: u16 = 1062;
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;

fn is_retryable_code(code: u16) -> bool {
    matches!(code, ER_DUP_ENTRY | ER_LOCK_WAIT_TIMEOUT | ER_LOCK_DEADLOCK)
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
            if is_retryable_code(mysql.number()) {
                tracing::warn!(code = mysql.number(), error = %mysql, "Transaction conflict");
                return StoreError::Conflict;
            }
        }
    }
    StoreError::Database(e)
}

fn parse_column<T: FromStr>(entity: &'static str, raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        entity,
        reason: format!("unknown status '{raw}'"),
    })
}

/* =========================
Row mappings
========================= */

#[derive(FromRow)]
struct RequestTypeRow {
    id: u64,
    name: String,
    has_fulfillment: bool,
    steps: Json<Vec<ApprovalStepDef>>,
    is_published: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RequestTypeRow> for RequestType {
    fn from(row: RequestTypeRow) -> Self {
        RequestType {
            id: row.id,
            name: row.name,
            has_fulfillment: row.has_fulfillment,
            steps: row.steps.0,
            is_published: row.is_published,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SUBMISSION_COLUMNS: &str = r#"
    id, request_type_id, requester_id, reference_code, status, current_step_index,
    steps, has_fulfillment, form_data, leave_details, approval_state, fulfillment_path,
    created_at, updated_at
"#;

#[derive(FromRow)]
struct SubmissionRow {
    id: u64,
    request_type_id: u64,
    requester_id: u64,
    reference_code: String,
    status: String,
    current_step_index: Option<u32>,
    steps: Json<Vec<ApprovalStepDef>>,
    has_fulfillment: bool,
    form_data: Json<Value>,
    leave_details: Option<Json<LeaveDetails>>,
    approval_state: Json<ApprovalState>,
    fulfillment_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for RequestSubmission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(RequestSubmission {
            id: row.id,
            request_type_id: row.request_type_id,
            requester_id: row.requester_id,
            reference_code: row.reference_code,
            status: parse_column::<SubmissionStatus>("submission", &row.status)?,
            current_step_index: row.current_step_index,
            steps: row.steps.0,
            has_fulfillment: row.has_fulfillment,
            form_data: row.form_data.0,
            leave: row.leave_details.map(|json| json.0),
            approval_state: row.approval_state.0,
            fulfillment_path: row.fulfillment_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ACTION_COLUMNS: &str = r#"
    id, submission_id, step_index, approver_id, via_role_id, via_position_id,
    status, acted_at, notes, created_at
"#;

#[derive(FromRow)]
struct ActionRow {
    id: u64,
    submission_id: u64,
    step_index: u32,
    approver_id: u64,
    via_role_id: Option<u64>,
    via_position_id: Option<u64>,
    status: String,
    acted_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for RequestApprovalAction {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(RequestApprovalAction {
            id: row.id,
            submission_id: row.submission_id,
            step_index: row.step_index,
            approver_id: row.approver_id,
            via_role_id: row.via_role_id,
            via_position_id: row.via_position_id,
            status: parse_column::<ActionStatus>("approval action", &row.status)?,
            acted_at: row.acted_at,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

fn actions_from_rows(rows: Vec<ActionRow>) -> Result<Vec<RequestApprovalAction>, StoreError> {
    rows.into_iter().map(RequestApprovalAction::try_from).collect()
}

/// Plain reads see the transaction's snapshot. Locking reads see the latest committed
/// row and hold it until commit or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Read {
    Plain,
    Locking,
}

fn select(columns: &str, source: &str, read: Read) -> String {
    match read {
        Read::Plain => format!("SELECT {columns} FROM {source}"),
        Read::Locking => format!("SELECT {columns} FROM {source} FOR UPDATE"),
    }
}

const SUBMISSION_BY_ID: &str = "request_submissions WHERE id = ?";
const ACTION_BY_ID: &str = "request_approval_actions WHERE id = ?";
const ACTIONS_OF_SUBMISSION: &str =
    "request_approval_actions WHERE submission_id = ? ORDER BY step_index, id";
const ACTIONS_OF_STEP: &str =
    "request_approval_actions WHERE submission_id = ? AND step_index = ? ORDER BY id";
const BALANCES_OF_EMPLOYEE: &str =
    "leave_balances WHERE employee_id = ? AND year = ? ORDER BY leave_type_id";
const BALANCE_BY_KEY: &str =
    "leave_balances WHERE employee_id = ? AND leave_type_id = ? AND year = ?";
const LEAVE_REQUEST_OF_SUBMISSION: &str = "workflow_leave_requests WHERE submission_id = ?";

const BALANCE_COLUMNS: &str = r#"
    employee_id, leave_type_id, year, entitled, accrued, used, pending, balance, carried_over
"#;

const LEAVE_REQUEST_COLUMNS: &str = r#"
    id, submission_id, employee_id, leave_type_id, start_date, end_date, days, status, created_at
"#;

#[derive(FromRow)]
struct LeaveRequestRow {
    id: u64,
    submission_id: u64,
    employee_id: u64,
    leave_type_id: u64,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
    days: rust_decimal::Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LeaveRequestRow> for LeaveRequest {
    type Error = StoreError;

    fn try_from(row: LeaveRequestRow) -> Result<Self, Self::Error> {
        Ok(LeaveRequest {
            id: row.id,
            submission_id: row.submission_id,
            employee_id: row.employee_id,
            leave_type_id: row.leave_type_id,
            start_date: row.start_date,
            end_date: row.end_date,
            days: row.days,
            status: parse_column::<LeaveRequestStatus>("leave request", &row.status)?,
            created_at: row.created_at,
        })
    }
}

/* =========================
Store
========================= */

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for MySqlStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(Box::new(MySqlUnitOfWork { tx }))
    }

    async fn request_type(&self, id: u64) -> Result<Option<RequestType>, StoreError> {
        let row = sqlx::query_as::<_, RequestTypeRow>(
            r#"
            SELECT id, name, has_fulfillment, steps, is_published, created_at, updated_at
            FROM request_types
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(RequestType::from))
    }

    async fn insert_request_type(
        &self,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO request_types
                (name, has_fulfillment, steps, is_published, created_at, updated_at)
            VALUES (?, ?, ?, FALSE, ?, ?)
            "#,
        )
        .bind(&draft.name)
        .bind(draft.has_fulfillment)
        .bind(Json(&draft.steps))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(RequestType {
            id: result.last_insert_id(),
            name: draft.name.clone(),
            has_fulfillment: draft.has_fulfillment,
            steps: draft.steps.clone(),
            is_published: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_request_type(
        &self,
        id: u64,
        draft: &RequestTypeDraft,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE request_types
            SET name = ?, has_fulfillment = ?, steps = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.name)
        .bind(draft.has_fulfillment)
        .bind(Json(&draft.steps))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "request type",
                id,
            });
        }

        self.request_type(id).await?.ok_or(StoreError::NotFound {
            entity: "request type",
            id,
        })
    }

    async fn publish_request_type(
        &self,
        id: u64,
        now: DateTime<Utc>,
    ) -> Result<RequestType, StoreError> {
        sqlx::query("UPDATE request_types SET is_published = TRUE, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        self.request_type(id).await?.ok_or(StoreError::NotFound {
            entity: "request type",
            id,
        })
    }

    async fn submission(&self, id: u64) -> Result<Option<RequestSubmission>, StoreError> {
        let sql = select(SUBMISSION_COLUMNS, SUBMISSION_BY_ID, Read::Plain);
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        row.map(RequestSubmission::try_from).transpose()
    }

    async fn actions_for_submission(
        &self,
        submission_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let sql = select(ACTION_COLUMNS, ACTIONS_OF_SUBMISSION, Read::Plain);
        let rows = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(submission_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        actions_from_rows(rows)
    }

    async fn pending_actions_for(
        &self,
        approver_id: u64,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT a.id, a.submission_id, a.step_index, a.approver_id, a.via_role_id,
                   a.via_position_id, a.status, a.acted_at, a.notes, a.created_at
            FROM request_approval_actions a
            JOIN request_submissions s ON s.id = a.submission_id
            WHERE a.approver_id = ?
              AND a.status = 'pending'
              AND s.status = 'pending'
              AND s.current_step_index = a.step_index
            ORDER BY a.created_at
            "#,
        )
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        actions_from_rows(rows)
    }

    async fn leave_balances(
        &self,
        employee_id: u64,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, StoreError> {
        let sql = select(BALANCE_COLUMNS, BALANCES_OF_EMPLOYEE, Read::Plain);
        sqlx::query_as::<_, LeaveBalance>(&sql)
            .bind(employee_id)
            .bind(year)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn leave_request_for(
        &self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError> {
        let sql = select(LEAVE_REQUEST_COLUMNS, LEAVE_REQUEST_OF_SUBMISSION, Read::Plain);
        let row = sqlx::query_as::<_, LeaveRequestRow>(&sql)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        row.map(LeaveRequest::try_from).transpose()
    }
}

/* =========================
Unit of work
========================= */

pub struct MySqlUnitOfWork {
    tx: Transaction<'static, MySql>,
}

impl MySqlUnitOfWork {
    async fn action_row(
        &mut self,
        id: u64,
        read: Read,
    ) -> Result<Option<RequestApprovalAction>, StoreError> {
        let row = sqlx::query_as::<_, ActionRow>(&select(ACTION_COLUMNS, ACTION_BY_ID, read))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        row.map(RequestApprovalAction::try_from).transpose()
    }
}

#[async_trait]
impl UnitOfWork for MySqlUnitOfWork {
    async fn insert_submission(
        &mut self,
        new: NewSubmission,
    ) -> Result<RequestSubmission, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO request_submissions
                (request_type_id, requester_id, reference_code, status, current_step_index,
                 steps, has_fulfillment, form_data, leave_details, approval_state,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.request_type_id)
        .bind(new.requester_id)
        .bind(&new.reference_code)
        .bind(new.status.as_ref())
        .bind(new.current_step_index)
        .bind(Json(&new.steps))
        .bind(new.has_fulfillment)
        .bind(Json(&new.form_data))
        .bind(new.leave.as_ref().map(Json))
        .bind(Json(&new.approval_state))
        .bind(new.created_at)
        .bind(new.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(RequestSubmission {
            id: result.last_insert_id(),
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
        })
    }

    async fn lock_submission(
        &mut self,
        id: u64,
    ) -> Result<Option<RequestSubmission>, StoreError> {
        let sql = select(SUBMISSION_COLUMNS, SUBMISSION_BY_ID, Read::Locking);
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        row.map(RequestSubmission::try_from).transpose()
    }

    async fn save_submission(&mut self, submission: &RequestSubmission) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE request_submissions
            SET status = ?, current_step_index = ?, approval_state = ?,
                fulfillment_path = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(submission.status.as_ref())
        .bind(submission.current_step_index)
        .bind(Json(&submission.approval_state))
        .bind(&submission.fulfillment_path)
        .bind(submission.updated_at)
        .bind(submission.id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn action(&mut self, id: u64) -> Result<Option<RequestApprovalAction>, StoreError> {
        self.action_row(id, Read::Plain).await
    }

    async fn lock_action(
        &mut self,
        id: u64,
    ) -> Result<Option<RequestApprovalAction>, StoreError> {
        self.action_row(id, Read::Locking).await
    }

    async fn lock_step_actions(
        &mut self,
        submission_id: u64,
        step_index: u32,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let sql = select(ACTION_COLUMNS, ACTIONS_OF_STEP, Read::Locking);
        let rows = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(submission_id)
            .bind(step_index)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        actions_from_rows(rows)
    }

    async fn insert_actions(
        &mut self,
        actions: Vec<NewApprovalAction>,
    ) -> Result<Vec<RequestApprovalAction>, StoreError> {
        let mut inserted = Vec::with_capacity(actions.len());
        for new in actions {
            let result = sqlx::query(
                r#"
                INSERT INTO request_approval_actions
                    (submission_id, step_index, approver_id, via_role_id, via_position_id,
                     status, created_at)
                VALUES (?, ?, ?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(new.submission_id)
            .bind(new.step_index)
            .bind(new.approver_id)
            .bind(new.via_role_id)
            .bind(new.via_position_id)
            .bind(new.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

            inserted.push(RequestApprovalAction {
                id: result.last_insert_id(),
                submission_id: new.submission_id,
                step_index: new.step_index,
                approver_id: new.approver_id,
                via_role_id: new.via_role_id,
                via_position_id: new.via_position_id,
                status: ActionStatus::Pending,
                acted_at: None,
                notes: None,
                created_at: new.created_at,
            });
        }
        Ok(inserted)
    }

    async fn save_action(&mut self, action: &RequestApprovalAction) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE request_approval_actions SET status = ?, acted_at = ?, notes = ? WHERE id = ?",
        )
        .bind(action.status.as_ref())
        .bind(action.acted_at)
        .bind(&action.notes)
        .bind(action.id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn lock_leave_balance(&mut self, key: BalanceKey) -> Result<LeaveBalance, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leave_balances (employee_id, leave_type_id, year)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE id = id
            "#,
        )
        .bind(key.employee_id)
        .bind(key.leave_type_id)
        .bind(key.year)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        let sql = select(BALANCE_COLUMNS, BALANCE_BY_KEY, Read::Locking);
        sqlx::query_as::<_, LeaveBalance>(&sql)
            .bind(key.employee_id)
            .bind(key.leave_type_id)
            .bind(key.year)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx)
    }

    async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE leave_balances
            SET entitled = ?, accrued = ?, used = ?, pending = ?, balance = ?, carried_over = ?
            WHERE employee_id = ? AND leave_type_id = ? AND year = ?
            "#,
        )
        .bind(balance.entitled)
        .bind(balance.accrued)
        .bind(balance.used)
        .bind(balance.pending)
        .bind(balance.derived_balance())
        .bind(balance.carried_over)
        .bind(balance.employee_id)
        .bind(balance.leave_type_id)
        .bind(balance.year)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn lock_leave_request_for(
        &mut self,
        submission_id: u64,
    ) -> Result<Option<LeaveRequest>, StoreError> {
        let sql = select(LEAVE_REQUEST_COLUMNS, LEAVE_REQUEST_OF_SUBMISSION, Read::Locking);
        let row = sqlx::query_as::<_, LeaveRequestRow>(&sql)
            .bind(submission_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        row.map(LeaveRequest::try_from).transpose()
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

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_leave_requests
                (submission_id, employee_id, leave_type_id, start_date, end_date, days,
                 status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(submission.id)
        .bind(leave.employee_id)
        .bind(leave.leave_type_id)
        .bind(leave.start_date)
        .bind(leave.end_date)
        .bind(leave.days)
        .bind(status.as_ref())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(LeaveRequest {
            id: result.last_insert_id(),
            submission_id: submission.id,
            employee_id: leave.employee_id,
            leave_type_id: leave.leave_type_id,
            start_date: leave.start_date,
            end_date: leave.end_date,
            days: leave.days,
            status,
            created_at: now,
        })
    }

    async fn set_leave_request_status(
        &mut self,
        id: u64,
        status: LeaveRequestStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflow_leave_requests SET status = ? WHERE id = ?")
            .bind(status.as_ref())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx)
    }
}

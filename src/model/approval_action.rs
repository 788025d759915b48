use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
}

/// One approver's slot on one step of one submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestApprovalAction {
    pub id: u64,
    pub submission_id: u64,
    pub step_index: u32,
    /// The user this action is bound to; only they may decide it.
    pub approver_id: u64,
    /// Role that produced the binding, kept for audit.
    pub via_role_id: Option<u64>,
    /// Position that produced the binding, kept for audit.
    pub via_position_id: Option<u64>,
    pub status: ActionStatus,
    #[schema(format = "date-time", value_type = String)]
    pub acted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApprovalAction {
    pub submission_id: u64,
    pub step_index: u32,
    pub approver_id: u64,
    pub via_role_id: Option<u64>,
    pub via_position_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

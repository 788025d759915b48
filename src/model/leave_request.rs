use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveRequestStatus {
    Approved,
    Rejected,
}

/// Historical snapshot of granted leave, written when a leave submission is approved.
/// Independent of the running totals on `LeaveBalance`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaveRequest {
    pub id: u64,
    pub submission_id: u64,
    pub employee_id: u64,
    pub leave_type_id: u64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "3", value_type = String)]
    pub days: Decimal,
    pub status: LeaveRequestStatus,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

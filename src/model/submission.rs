use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::model::request_type::ApprovalStepDef;

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
pub enum SubmissionStatus {
    Pending,
    Approved,
    Fulfillment,
    Rejected,
    Completed,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Approved | SubmissionStatus::Rejected | SubmissionStatus::Completed
        )
    }

    /// Statuses reached through a successful approval pipeline.
    pub fn is_granted(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Approved | SubmissionStatus::Fulfillment | SubmissionStatus::Completed
        )
    }
}

/// Where the leave reservation of a submission stands. Drives the at-most-once
/// guarantee of the balance ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaveSettlement {
    #[default]
    None,
    Reserved,
    Deducted,
    Released,
}

/// Auxiliary bookkeeping carried on the submission row (`approval_state` JSON column).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalState {
    #[serde(default)]
    pub leave_settlement: LeaveSettlement,
    #[serde(default)]
    pub certificate_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Leave application attached to a submission of the designated leave type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaveDetails {
    pub employee_id: u64,
    pub leave_type_id: u64,
    #[schema(example = "2026-03-02", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-03-04", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    /// Working days between the two dates, inclusive.
    #[schema(example = "3", value_type = String)]
    pub days: Decimal,
    /// Ledger year the days are booked against.
    pub year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestSubmission {
    pub id: u64,
    pub request_type_id: u64,
    pub requester_id: u64,
    #[schema(example = "REQ-20260302-7F3A9")]
    pub reference_code: String,
    pub status: SubmissionStatus,
    pub current_step_index: Option<u32>,
    /// Step definitions copied from the request type when the submission was created.
    pub steps: Vec<ApprovalStepDef>,
    pub has_fulfillment: bool,
    #[schema(value_type = Object)]
    pub form_data: Value,
    pub leave: Option<LeaveDetails>,
    #[schema(value_type = Object)]
    pub approval_state: ApprovalState,
    pub fulfillment_path: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl RequestSubmission {
    pub fn last_step_index(&self) -> Option<u32> {
        (self.steps.len() as u32).checked_sub(1)
    }

    pub fn step(&self, index: u32) -> Option<&ApprovalStepDef> {
        self.steps.get(index as usize)
    }
}

/// Everything needed to insert a submission row; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub request_type_id: u64,
    pub requester_id: u64,
    pub reference_code: String,
    pub status: SubmissionStatus,
    pub current_step_index: Option<u32>,
    pub steps: Vec<ApprovalStepDef>,
    pub has_fulfillment: bool,
    pub form_data: Value,
    pub leave: Option<LeaveDetails>,
    pub approval_state: ApprovalState,
    pub created_at: DateTime<Utc>,
}

/// `REQ-YYYYMMDD-XXXXX`, the suffix being five upper-case hex characters.
pub fn generate_reference_code(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .to_string()
        .chars()
        .filter(|c| *c != '-')
        .take(5)
        .collect::<String>()
        .to_uppercase();

    format!("REQ-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn reference_code_carries_the_date() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        let code = generate_reference_code(now);

        assert!(code.starts_with("REQ-20260302-"), "{code}");
        assert_eq!(code.len(), "REQ-20260302-".len() + 5);
        assert!(code[13..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn status_round_trips_through_its_column_value() {
        assert_eq!(SubmissionStatus::Fulfillment.as_ref(), "fulfillment");
        assert_eq!(
            SubmissionStatus::from_str("completed").unwrap(),
            SubmissionStatus::Completed
        );
        assert!(SubmissionStatus::from_str("archived").is_err());
    }

    #[test]
    fn approval_state_keeps_unknown_keys() {
        let state: ApprovalState = serde_json::from_value(serde_json::json!({
            "leave_settlement": "reserved",
            "escalated": true
        }))
        .unwrap();

        assert_eq!(state.leave_settlement, LeaveSettlement::Reserved);
        assert!(!state.certificate_generated);
        assert_eq!(state.extra.get("escalated"), Some(&Value::Bool(true)));
    }
}

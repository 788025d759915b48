use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Where the approvers of a step come from.
///
/// Stored as `{"type": "role", "id": 4}` inside the `steps` JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverSpec {
    /// One named user.
    User { id: u64 },
    /// Every active member of the role.
    Role { id: u64 },
    /// Whoever currently holds the position, faculty-scoped when the position is.
    Position { id: u64 },
}

impl ApproverSpec {
    pub fn role_id(&self) -> Option<u64> {
        match self {
            ApproverSpec::Role { id } => Some(*id),
            _ => None,
        }
    }

    pub fn position_id(&self) -> Option<u64> {
        match self {
            ApproverSpec::Position { id } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Head of department",
    "approvers": [{ "type": "position", "id": 3 }]
}))]
pub struct ApprovalStepDef {
    pub name: String,
    pub approvers: Vec<ApproverSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestType {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "Leave Request")]
    pub name: String,
    pub has_fulfillment: bool,
    pub steps: Vec<ApprovalStepDef>,
    pub is_published: bool,
    #[schema(example = "2026-01-01T00:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(example = "2026-01-01T00:00:00Z", format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating or editing a request type. Validated before it is saved so the
/// engine never sees a malformed step.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RequestTypeDraft {
    #[schema(example = "Travel Reimbursement")]
    pub name: String,
    #[serde(default)]
    pub has_fulfillment: bool,
    #[serde(default)]
    pub steps: Vec<ApprovalStepDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestTypeError {
    #[error("request type name must not be empty")]
    EmptyName,
    #[error("step {index} has no name")]
    UnnamedStep { index: usize },
    #[error("step {index} ({name}) has no approvers")]
    NoApprovers { index: usize, name: String },
    #[error("step {index} ({name}) lists the same approver twice")]
    DuplicateApprover { index: usize, name: String },
}

impl RequestTypeDraft {
    pub fn validate(&self) -> Result<(), RequestTypeError> {
        if self.name.trim().is_empty() {
            return Err(RequestTypeError::EmptyName);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(RequestTypeError::UnnamedStep { index });
            }
            if step.approvers.is_empty() {
                return Err(RequestTypeError::NoApprovers {
                    index,
                    name: step.name.clone(),
                });
            }

            let mut seen = HashSet::with_capacity(step.approvers.len());
            if !step.approvers.iter().all(|spec| seen.insert(*spec)) {
                return Err(RequestTypeError::DuplicateApprover {
                    index,
                    name: step.name.clone(),
                });
            }
        }

        Ok(())
    }
}

impl RequestType {
    pub fn last_step_index(&self) -> Option<u32> {
        (self.steps.len() as u32).checked_sub(1)
    }
}

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

use crate::collab::{FileStoreError, IdentityError};
use crate::model::{BalanceError, RequestTypeError, SubmissionStatus};
use crate::store::StoreError;
use crate::workflow::leave::LeaveError;
use crate::workflow::ledger::ActionError;
use crate::workflow::resolver::ResolutionError;
use crate::workflow::state_machine::TransitionError;

/// Everything a workflow operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    RequestType(#[from] RequestTypeError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Action(ActionError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Leave(LeaveError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("submission {submission_id} is {status} and not awaiting fulfillment")]
    NotAwaitingFulfillment {
        submission_id: u64,
        status: SubmissionStatus,
    },
    #[error("user {user_id} may not fulfill submission {submission_id}")]
    FulfillmentNotAllowed { submission_id: u64, user_id: u64 },
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Files(#[from] FileStoreError),
    #[error("the request collided with a concurrent change, please try again")]
    TryAgain,
    #[error(transparent)]
    Store(StoreError),
}

impl WorkflowError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowError::Store(StoreError::Conflict))
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => WorkflowError::NotFound { entity, id },
            other => WorkflowError::Store(other),
        }
    }
}

impl From<ActionError> for WorkflowError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Store(e) => e.into(),
            ActionError::NotFound { action_id } => WorkflowError::NotFound {
                entity: "approval action",
                id: action_id,
            },
            other => WorkflowError::Action(other),
        }
    }
}

impl From<LeaveError> for WorkflowError {
    fn from(e: LeaveError) -> Self {
        match e {
            LeaveError::Store(e) => e.into(),
            LeaveError::Balance(e) => WorkflowError::Balance(e),
            other => WorkflowError::Leave(other),
        }
    }
}

impl ResponseError for WorkflowError {
    fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::Validation(_)
            | WorkflowError::RequestType(_)
            | WorkflowError::Leave(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Files(FileStoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            WorkflowError::Action(ActionError::NotAuthorized { .. })
            | WorkflowError::FulfillmentNotAllowed { .. } => StatusCode::FORBIDDEN,
            WorkflowError::Action(_)
            | WorkflowError::Transition(_)
            | WorkflowError::NotAwaitingFulfillment { .. } => StatusCode::CONFLICT,
            WorkflowError::Resolution(ResolutionError::Identity(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WorkflowError::Resolution(_)
            | WorkflowError::Balance(BalanceError::InsufficientEntitlement { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WorkflowError::TryAgain => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::Balance(_)
            | WorkflowError::Identity(_)
            | WorkflowError::Files(_)
            | WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Workflow request failed");
            return HttpResponse::build(status).json(json!({ "error": "Internal Server Error" }));
        }

        HttpResponse::build(status).json(json!({ "error": self.to_string() }))
    }
}

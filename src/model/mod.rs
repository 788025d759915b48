pub mod approval_action;
pub mod leave_balance;
pub mod leave_request;
pub mod request_type;
pub mod role;
pub mod submission;

pub use approval_action::{ActionStatus, NewApprovalAction, RequestApprovalAction};
pub use leave_balance::{BalanceError, BalanceKey, LeaveBalance};
pub use leave_request::{LeaveRequest, LeaveRequestStatus};
pub use request_type::{
    ApprovalStepDef, ApproverSpec, RequestType, RequestTypeDraft, RequestTypeError,
};
pub use submission::{
    ApprovalState, LeaveDetails, LeaveSettlement, NewSubmission, RequestSubmission,
    SubmissionStatus,
};

use crate::api::leave_balance::BalanceQuery;
use crate::api::submission::{DecisionPayload, SubmissionDetail};
use crate::model::{
    ActionStatus, ApprovalStepDef, ApproverSpec, LeaveBalance, LeaveDetails, LeaveRequest,
    LeaveRequestStatus, LeaveSettlement, RequestApprovalAction, RequestSubmission, RequestType,
    RequestTypeDraft, SubmissionStatus,
};
use crate::workflow::{DecisionReceipt, LeaveApplication, SubmissionInput};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Workflow API",
        version = "1.0.0",
        description = r#"
## HR Approval Workflows

Configurable multi-step approval pipelines for HR requests, with a leave-balance ledger
for leave requests.

### 🔹 Key Features
- **Request Types**
  - Design ordered approval steps; each step names users, roles or positions
- **Requests**
  - Submit, approve or reject step actions, upload fulfillment artifacts
- **Leave**
  - Working-day counting, reservation on submission, deduction on approval

### 🔐 Security
All endpoints are protected using **JWT Bearer authentication**.
Only **Admin** or **HR** can design request types.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::request_type::create_request_type,
        crate::api::request_type::update_request_type,
        crate::api::request_type::publish_request_type,
        crate::api::request_type::get_request_type,

        crate::api::submission::create_submission,
        crate::api::submission::get_submission,
        crate::api::submission::my_pending_actions,
        crate::api::submission::approve_action,
        crate::api::submission::reject_action,
        crate::api::submission::fulfill_submission,

        crate::api::leave_balance::list_leave_balances
    ),
    components(
        schemas(
            ApproverSpec,
            ApprovalStepDef,
            RequestType,
            RequestTypeDraft,
            SubmissionStatus,
            RequestSubmission,
            LeaveDetails,
            LeaveSettlement,
            ActionStatus,
            RequestApprovalAction,
            SubmissionInput,
            LeaveApplication,
            SubmissionDetail,
            DecisionPayload,
            DecisionReceipt,
            LeaveBalance,
            LeaveRequest,
            LeaveRequestStatus,
            BalanceQuery
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Request Types", description = "Approval pipeline design"),
        (name = "Requests", description = "Submissions, approval actions and fulfillment"),
        (name = "Leave", description = "Leave balance ledger"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

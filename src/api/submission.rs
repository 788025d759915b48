use crate::auth::auth::AuthUser;
use crate::model::{RequestApprovalAction, RequestSubmission};
use crate::workflow::{
    Decision, DecisionReceipt, FulfillmentArtifact, SubmissionInput, WorkflowOrchestrator,
};
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, ToSchema)]
pub struct SubmissionDetail {
    pub submission: RequestSubmission,
    /// Every approval action materialized so far, across all steps.
    pub actions: Vec<RequestApprovalAction>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct DecisionPayload {
    #[schema(example = "Covered by the travel budget")]
    pub notes: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct FulfillmentQuery {
    /// Name of the uploaded artifact, e.g. `letter.pdf`
    pub filename: String,
}

/* =========================
Submit a request
========================= */
/// Swagger doc for create_submission endpoint
#[utoipa::path(
    post,
    path = "/api/requests",
    request_body(
        content = SubmissionInput,
        description = "Request type, form answers and, for leave, the leave application",
        content_type = "application/json"
    ),
    responses(
        (
            status = 201,
            description = "Submission created and first step activated",
            body = RequestSubmission
        ),
        (status = 400, description = "Unpublished type or malformed payload"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Request type not found"),
        (
            status = 422,
            description = "A step resolves to no approvers or the leave entitlement is exhausted"
        ),
        (status = 503, description = "Concurrent change, retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn create_submission(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    payload: web::Json<SubmissionInput>,
) -> actix_web::Result<impl Responder> {
    let submission = workflow
        .submit(auth.actor(), payload.into_inner(), Utc::now())
        .await?;

    Ok(HttpResponse::Created().json(submission))
}

/// Swagger doc for get_submission endpoint
#[utoipa::path(
    get,
    path = "/api/requests/{id}",
    params(
        ("id" = u64, Path, description = "ID of the submission")
    ),
    responses(
        (
            status = 200,
            description = "Submission with its approval actions",
            body = SubmissionDetail
        ),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Neither requester, approver nor HR/Admin"),
        (status = 404, description = "Submission not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn get_submission(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let (submission, actions) = workflow.submission_with_actions(path.into_inner()).await?;

    let involved = submission.requester_id == auth.user_id
        || actions.iter().any(|a| a.approver_id == auth.user_id);
    if !involved {
        auth.require_hr_or_admin()?;
    }

    Ok(HttpResponse::Ok().json(SubmissionDetail {
        submission,
        actions,
    }))
}

/// Swagger doc for my_pending_actions endpoint
#[utoipa::path(
    get,
    path = "/api/requests/actions/pending",
    responses(
        (
            status = 200,
            description = "Actions waiting for the calling user",
            body = [RequestApprovalAction]
        ),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn my_pending_actions(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
) -> actix_web::Result<impl Responder> {
    let actions = workflow.pending_actions(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(actions))
}

async fn decide(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    action_id: u64,
    decision: Decision,
    payload: Option<web::Json<DecisionPayload>>,
) -> actix_web::Result<HttpResponse> {
    let notes = payload
        .map(|p| p.into_inner())
        .unwrap_or_default()
        .notes
        .filter(|n| !n.trim().is_empty());

    let receipt: DecisionReceipt = workflow
        .decide(action_id, decision, auth.actor(), notes, Utc::now())
        .await?;

    Ok(HttpResponse::Ok().json(receipt))
}

/* =========================
Approve an action (bound approver only)
========================= */
/// Swagger doc for approve_action endpoint
#[utoipa::path(
    put,
    path = "/api/requests/actions/{action_id}/approve",
    params(
        ("action_id" = u64, Path, description = "ID of the approval action")
    ),
    request_body(
        content = DecisionPayload,
        description = "Optional notes",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Decision recorded", body = DecisionReceipt),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the bound approver or step not active"),
        (status = 404, description = "Approval action not found"),
        (status = 409, description = "Already decided or submission closed"),
        (status = 422, description = "Next step resolves to no approvers"),
        (status = 503, description = "Concurrent change, retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn approve_action(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
    payload: Option<web::Json<DecisionPayload>>,
) -> actix_web::Result<impl Responder> {
    decide(auth, workflow, path.into_inner(), Decision::Approve, payload).await
}

/* =========================
Reject an action (bound approver only)
========================= */
/// Swagger doc for reject_action endpoint
#[utoipa::path(
    put,
    path = "/api/requests/actions/{action_id}/reject",
    params(
        ("action_id" = u64, Path, description = "ID of the approval action")
    ),
    request_body(
        content = DecisionPayload,
        description = "Optional notes",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Submission rejected", body = DecisionReceipt),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the bound approver or step not active"),
        (status = 404, description = "Approval action not found"),
        (status = 409, description = "Already decided or submission closed"),
        (status = 503, description = "Concurrent change, retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn reject_action(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
    payload: Option<web::Json<DecisionPayload>>,
) -> actix_web::Result<impl Responder> {
    decide(auth, workflow, path.into_inner(), Decision::Reject, payload).await
}

/* =========================
Upload fulfillment artifact
========================= */
/// Swagger doc for fulfill_submission endpoint
#[utoipa::path(
    post,
    path = "/api/requests/{id}/fulfillment",
    params(
        ("id" = u64, Path, description = "ID of the submission"),
        FulfillmentQuery
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (
            status = 200,
            description = "Artifact stored and submission completed",
            body = RequestSubmission
        ),
        (status = 400, description = "Unusable file name"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a final-step approver or request manager"),
        (status = 404, description = "Submission not found"),
        (status = 409, description = "Submission is not awaiting fulfillment")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Requests"
)]
pub async fn fulfill_submission(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
    query: web::Query<FulfillmentQuery>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    let artifact = FulfillmentArtifact {
        filename: query.into_inner().filename,
        bytes: body.to_vec(),
    };

    let submission = workflow
        .fulfill(path.into_inner(), auth.actor(), artifact, Utc::now())
        .await?;

    Ok(HttpResponse::Ok().json(submission))
}

use crate::auth::auth::AuthUser;
use crate::model::RequestTypeDraft;
use crate::workflow::WorkflowOrchestrator;
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;

/* =========================
Create request type (HR/Admin)
========================= */
/// Swagger doc for create_request_type endpoint
#[utoipa::path(
    post,
    path = "/api/request-types",
    request_body(
        content = RequestTypeDraft,
        description = "Name, fulfillment flag and ordered approval steps",
        content_type = "application/json"
    ),
    responses(
        (
            status = 201,
            description = "Request type created (unpublished)",
            body = crate::model::RequestType
        ),
        (
            status = 400,
            description = "Malformed steps or approvers",
            body = Object,
            example = json!({ "error": "step 0 (Supervisor) has no approvers" })
        ),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Request Types"
)]
pub async fn create_request_type(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    payload: web::Json<RequestTypeDraft>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let created = workflow
        .create_request_type(payload.into_inner(), Utc::now())
        .await?;

    Ok(HttpResponse::Created().json(created))
}

/* =========================
Edit request type (HR/Admin)
========================= */
/// Swagger doc for update_request_type endpoint
#[utoipa::path(
    put,
    path = "/api/request-types/{id}",
    params(
        ("id" = u64, Path, description = "ID of the request type")
    ),
    request_body = RequestTypeDraft,
    responses(
        (
            status = 200,
            description = "Updated; submissions in flight keep their steps",
            body = crate::model::RequestType
        ),
        (status = 400, description = "Malformed steps or approvers"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Request type not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Request Types"
)]
pub async fn update_request_type(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
    payload: web::Json<RequestTypeDraft>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let updated = workflow
        .update_request_type(path.into_inner(), payload.into_inner(), Utc::now())
        .await?;

    Ok(HttpResponse::Ok().json(updated))
}

/* =========================
Publish request type (HR/Admin)
========================= */
/// Swagger doc for publish_request_type endpoint
#[utoipa::path(
    put,
    path = "/api/request-types/{id}/publish",
    params(
        ("id" = u64, Path, description = "ID of the request type")
    ),
    responses(
        (
            status = 200,
            description = "Request type now accepts submissions",
            body = crate::model::RequestType
        ),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Request type not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Request Types"
)]
pub async fn publish_request_type(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let published = workflow
        .publish_request_type(path.into_inner(), Utc::now())
        .await?;

    Ok(HttpResponse::Ok().json(published))
}

/// Swagger doc for get_request_type endpoint
#[utoipa::path(
    get,
    path = "/api/request-types/{id}",
    params(
        ("id" = u64, Path, description = "ID of the request type")
    ),
    responses(
        (
            status = 200,
            description = "Request type with its approval steps",
            body = crate::model::RequestType
        ),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Request type not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Request Types"
)]
pub async fn get_request_type(
    _auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request_type = workflow.request_type(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request_type))
}

use crate::auth::auth::AuthUser;
use crate::workflow::WorkflowOrchestrator;
use actix_web::{HttpResponse, Responder, web};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct BalanceQuery {
    #[schema(example = 1000)]
    /// Employee whose balances to list; defaults to the caller's own profile
    pub employee_id: Option<u64>,
    #[schema(example = 2026)]
    /// Ledger year; defaults to the current year
    pub year: Option<i32>,
}

/// Swagger doc for list_leave_balances endpoint
#[utoipa::path(
    get,
    path = "/api/leave-balances",
    params(BalanceQuery),
    responses(
        (status = 200, description = "One row per leave type", body = [crate::model::LeaveBalance]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Another employee's balances, or no employee profile")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn list_leave_balances(
    auth: AuthUser,
    workflow: web::Data<WorkflowOrchestrator>,
    query: web::Query<BalanceQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = match (query.employee_id, auth.employee_id) {
        (Some(requested), Some(own)) if requested == own => own,
        (Some(requested), _) => {
            auth.require_hr_or_admin()?;
            requested
        }
        (None, Some(own)) => own,
        (None, None) => return Err(actix_web::error::ErrorForbidden("No employee profile")),
    };
    let year = query.year.unwrap_or_else(|| Utc::now().year());

    let balances = workflow.leave_balances(employee_id, year).await?;
    Ok(HttpResponse::Ok().json(balances))
}

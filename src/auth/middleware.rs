use crate::auth::auth::AuthUser;
use crate::config::Config;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    error::ErrorInternalServerError,
    web::Data,
};

/// Authenticates every request of the scope it wraps. Handlers find the decoded
/// [`AuthUser`] in the request extensions.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let secret = req
        .app_data::<Data<Config>>()
        .map(|config| config.jwt_secret.clone())
        .ok_or_else(|| ErrorInternalServerError("App config missing"))?;

    match AuthUser::from_headers(req.headers(), &secret) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.call(req).await
        }
        Err(e) => {
            tracing::debug!(path = %req.path(), error = %e, "Rejected unauthenticated request");
            let resp = e.error_response();
            Ok(req.into_response(resp))
        }
    }
}

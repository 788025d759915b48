use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::model::role::Role;
use crate::workflow::Actor;
use actix_web::http::StatusCode;
use actix_web::http::header::{AUTHORIZATION, HeaderMap};
use actix_web::{
    FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError, dev::Payload,
    error::ErrorInternalServerError, web::Data,
};
use futures::future::{Ready, ready};
use serde_json::json;

/// Why a request could not be tied to a platform user. Always answered with 401.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header encoding")]
    BadEncoding,
    #[error("Authorization header must start with Bearer")]
    NotBearer,
    #[error("Invalid or expired token")]
    InvalidToken(String),
    #[error("Invalid role")]
    UnknownRole(u8),
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AuthError::InvalidToken(details) => {
                json!({ "error": self.to_string(), "details": details })
            }
            _ => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl AuthUser {
    /// Decodes the bearer access token carried in `headers`.
    pub fn from_headers(headers: &HeaderMap, secret: &str) -> Result<Self, AuthError> {
        let header = headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
        let token = header
            .to_str()
            .map_err(|_| AuthError::BadEncoding)?
            .strip_prefix("Bearer ")
            .ok_or(AuthError::NotBearer)?;

        let claims = verify_token(token, secret).map_err(AuthError::InvalidToken)?;
        let role = Role::from_id(claims.role).ok_or(AuthError::UnknownRole(claims.role))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            employee_id: claims.employee_id,
        })
    }

    pub fn require_hr_or_admin(&self) -> actix_web::Result<()> {
        if self.role.manages_workflows() {
            Ok(())
        } else {
            Err(actix_web::error::ErrorForbidden("HR/Admin only"))
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            employee_id: self.employee_id,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Already decoded by the auth middleware.
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let Some(config) = req.app_data::<Data<Config>>() else {
            return ready(Err(ErrorInternalServerError("Config missing")));
        };
        ready(AuthUser::from_headers(req.headers(), &config.jwt_secret).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_access_token;
    use actix_web::http::header::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_becomes_an_actor() {
        let token = generate_access_token(7, "hr.admin".to_string(), 2, Some(1007), "s3cret", 60)
            .unwrap();

        let user = AuthUser::from_headers(&headers(&format!("Bearer {token}")), "s3cret").unwrap();

        assert_eq!(user.role, Role::Hr);
        assert!(user.require_hr_or_admin().is_ok());
        assert_eq!(
            user.actor(),
            Actor {
                user_id: 7,
                employee_id: Some(1007)
            }
        );
    }

    #[test]
    fn malformed_credentials_are_told_apart() {
        assert!(matches!(
            AuthUser::from_headers(&HeaderMap::new(), "s3cret"),
            Err(AuthError::MissingHeader)
        ));
        assert!(matches!(
            AuthUser::from_headers(&headers("Basic dXNlcjpwYXNz"), "s3cret"),
            Err(AuthError::NotBearer)
        ));
        assert!(matches!(
            AuthUser::from_headers(&headers("Bearer not-a-jwt"), "s3cret"),
            Err(AuthError::InvalidToken(_))
        ));

        let token = generate_access_token(7, "ghost".to_string(), 9, None, "s3cret", 60).unwrap();
        let err = AuthUser::from_headers(&headers(&format!("Bearer {token}")), "s3cret")
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownRole(9)));
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
    }
}

use crate::{
    api::{leave_balance, request_type, submission},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Per-scope limiter; `None` only for a configuration the builder refuses.
fn build_limiter(requests_per_min: u32) -> Option<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        (60_000 / requests_per_min as u64).max(1)
    };
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()?;
    Some(Governor::new(&cfg))
}

/// Workflow endpoints, without rate limiting. Shared by the server and the HTTP tests.
pub fn workflow_scope(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/request-types")
            // /request-types
            .service(web::resource("").route(web::post().to(request_type::create_request_type)))
            // /request-types/{id}
            .service(
                web::resource("/{id}")
                    .route(web::get().to(request_type::get_request_type))
                    .route(web::put().to(request_type::update_request_type)),
            )
            // /request-types/{id}/publish
            .service(
                web::resource("/{id}/publish")
                    .route(web::put().to(request_type::publish_request_type)),
            ),
    )
    .service(
        web::scope("/requests")
            // /requests
            .service(web::resource("").route(web::post().to(submission::create_submission)))
            // /requests/actions/pending (before /{id} so "actions" is not taken for an id)
            .service(
                web::resource("/actions/pending")
                    .route(web::get().to(submission::my_pending_actions)),
            )
            // /requests/actions/{action_id}/approve
            .service(
                web::resource("/actions/{action_id}/approve")
                    .route(web::put().to(submission::approve_action)),
            )
            // /requests/actions/{action_id}/reject
            .service(
                web::resource("/actions/{action_id}/reject")
                    .route(web::put().to(submission::reject_action)),
            )
            // /requests/{id}
            .service(web::resource("/{id}").route(web::get().to(submission::get_submission)))
            // /requests/{id}/fulfillment
            .service(
                web::resource("/{id}/fulfillment")
                    .route(web::post().to(submission::fulfill_submission)),
            ),
    )
    .service(
        web::resource("/leave-balances").route(web::get().to(leave_balance::list_leave_balances)),
    );
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let protected = web::scope(&config.api_prefix)
        .wrap(from_fn(auth_middleware)) // authentication
        .configure(workflow_scope);

    match build_limiter(config.rate_protected_per_min) {
        Some(limiter) => {
            cfg.service(protected.wrap(Arc::new(limiter))); // rate limiting
        }
        None => {
            tracing::warn!(
                rate = config.rate_protected_per_min,
                "Rate limiter rejected its configuration, serving without it"
            );
            cfg.service(protected);
        }
    }
}

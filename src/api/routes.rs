// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .configure(configure_builder_routes);
}

/// API v1 routes (all require authentication)
pub fn configure_builder_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1").service(
            web::resource("/events/{event_id}/builder")
                .route(web::get().to(handlers::get_builder))
                .route(web::put().to(handlers::put_builder)),
        ),
    );
}

// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::registration::{BuilderEngine, BuilderError, BuilderScope, RawBuilderPayload};
use crate::util::db::Db;
use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse, Result};
use std::time::Instant;

/// Process start, for the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct StartedAt(pub Instant);

/// Health check endpoint
pub async fn health_check(db: web::Data<Db>, started: web::Data<StartedAt>) -> Result<HttpResponse> {
    let db_status = if db.ping().await { "connected" } else { "disconnected" };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: started.0.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

fn scope_of(event_id: String, query: BuilderQuery) -> BuilderScope {
    let instance_id = query.instance_id.filter(|s| !s.trim().is_empty());
    BuilderScope::new(event_id, instance_id)
}

/// Current builder state of an event
pub async fn get_builder(
    path: web::Path<String>,
    query: web::Query<BuilderQuery>,
    engine: web::Data<BuilderEngine>,
) -> Result<HttpResponse> {
    let scope = scope_of(path.into_inner(), query.into_inner());
    match engine.get(&scope).await {
        Ok(view) => Ok(HttpResponse::Ok().json(ApiResponse::success(view))),
        Err(e) => Ok(error_response(&scope, e)),
    }
}

/// Save the full builder tree of an event
pub async fn put_builder(
    path: web::Path<String>,
    query: web::Query<BuilderQuery>,
    payload: web::Json<RawBuilderPayload>,
    engine: web::Data<BuilderEngine>,
) -> Result<HttpResponse> {
    let scope = scope_of(path.into_inner(), query.into_inner());
    tracing::info!(
        event_id = %scope.event_id,
        instance_id = ?scope.instance_id,
        tiers = payload.tiers.len(),
        periods = payload.periods.len(),
        "builder save requested"
    );
    match engine.put(&scope, &payload).await {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::success(summary))),
        Err(e) => Ok(error_response(&scope, e)),
    }
}

/// Map engine errors onto HTTP. Internal failures are logged here and
/// reported without detail.
pub fn error_response(scope: &BuilderScope, err: BuilderError) -> HttpResponse {
    match err {
        BuilderError::Validation(errors) => {
            tracing::info!(event_id = %scope.event_id, errors = errors.len(), "builder payload rejected");
            let details = errors.into_iter().map(ErrorDetail::from).collect();
            HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error("Validation failed").with_errors(details))
        }
        BuilderError::NotFound { .. } => {
            HttpResponse::NotFound().json(ApiResponse::<()>::error(err.to_string()))
        }
        BuilderError::NoProviderAccount { .. } => {
            HttpResponse::Conflict().json(ApiResponse::<()>::error(err.to_string()))
        }
        other => {
            tracing::error!(event_id = %scope.event_id, error = %other, "builder request failed");
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("Internal server error"))
        }
    }
}

/// Malformed JSON bodies get the same envelope as validation errors.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = err.to_string();
    let response = HttpResponse::BadRequest().json(
        ApiResponse::<()>::error("Invalid request body").with_errors(vec![ErrorDetail {
            code: "malformed".to_string(),
            message,
            field: None,
        }]),
    );
    actix_web::error::InternalError::from_response(err, response).into()
}

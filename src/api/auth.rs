use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};

use crate::api::models::ApiResponse;

/// Bearer-secret guard in front of the builder routes. Health checks pass
/// through unauthenticated.
pub struct Auth {
    secret: String,
}

impl Auth {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if is_public(req.path()) || bearer_token(&req) == Some(self.secret.as_str()) {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        Box::pin(async move {
            tracing::warn!(
                method = %req.method(),
                path = %req.path(),
                event_id = builder_event(req.path()).unwrap_or("-"),
                "builder request rejected: bad or missing bearer secret"
            );
            let response = HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("Invalid or missing authentication token"))
                .map_into_right_body();
            Ok(req.into_response(response))
        })
    }
}

fn is_public(path: &str) -> bool {
    matches!(path, "/" | "/health")
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Event id of a `/api/v1/events/{event_id}/builder` path.
fn builder_event(path: &str) -> Option<&str> {
    path.strip_prefix("/api/v1/events/")?
        .strip_suffix("/builder")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

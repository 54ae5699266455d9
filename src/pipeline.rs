//! Per-request pipeline
//!
//! Wraps every route: warm the credential store, resolve the caller's
//! identity, then hand over to the route. Nothing downstream can run
//! against a cold store.

use std::rc::Rc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, HttpMessage, ResponseError};
use futures::future::{ready, LocalBoxFuture, Ready};
use tracing::debug;

use crate::auth::Store;
use crate::error::AppError;
use crate::AppState;

/// Routes that never touch the store and so skip warm-up.
pub const HEALTH_PATH: &str = "/health";

pub struct Pipeline;

impl<S, B> Transform<S, ServiceRequest> for Pipeline
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = PipelineMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PipelineMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct PipelineMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for PipelineMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            if req.path() != HEALTH_PATH {
                if let Err(e) = prepare(&req).await {
                    // Terminal translation: the error becomes the response.
                    debug!("Request to {} stopped before routing: {}", req.path(), e);
                    let response = e.error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }

            service.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}

/// Warms the store and attaches the store handle and resolved principal.
async fn prepare(req: &ServiceRequest) -> Result<(), AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::InternalError("application state not configured".into()))?;

    // Suspends here while a connection attempt is in flight.
    let store = state.store.acquire().await?;

    let principal = state
        .identity
        .resolve(req.request(), store.as_ref(), &state.strategies)
        .await?;

    let mut extensions = req.extensions_mut();
    extensions.insert(Store(store));
    if let Some(principal) = principal {
        extensions.insert(principal);
    }
    Ok(())
}

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{Credentials, Principal, Store};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: Principal,
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "msg": "Auth Service API running" }))
}

pub async fn login(
    req: web::Json<Credentials>,
    Store(store): Store,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for identifier: {}", req.identifier);

    let principal = match state.strategies.authenticate(store.as_ref(), &req).await {
        Ok(principal) => principal,
        Err(e) => {
            warn!("Login failed for identifier: {}", req.identifier);
            return Err(e);
        }
    };

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = state.identity.establish(&principal).await? {
        response.cookie(cookie);
    }

    info!("Login successful for identifier: {}", principal.identifier());
    Ok(response.json(UserResponse { user: principal }))
}

pub async fn register(
    req: web::Json<Credentials>,
    Store(store): Store,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for identifier: {}", req.identifier);

    let principal = match state.strategies.register(store.as_ref(), &req).await {
        Ok(principal) => principal,
        Err(e) => {
            warn!("Registration failed for identifier: {}: {}", req.identifier, e);
            return Err(e);
        }
    };

    let mut response = HttpResponse::Created();
    if let Some(cookie) = state.identity.establish(&principal).await? {
        response.cookie(cookie);
    }

    Ok(response.json(UserResponse { user: principal }))
}

pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mut response = HttpResponse::Ok();
    if let Some(removal) = state.identity.end(&req).await? {
        response.cookie(removal);
    }

    Ok(response.json(serde_json::json!({
        "message": "Logged out"
    })))
}

pub async fn me(principal: Principal) -> HttpResponse {
    HttpResponse::Ok().json(UserResponse { user: principal })
}

pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(req.path().to_string()))
}

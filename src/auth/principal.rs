use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use serde::Serialize;
use uuid::Uuid;

use crate::db::models::StoredCredential;
use crate::db::StoreHandle;
use crate::error::{AppError, AuthError};

/// A verified identity attached to a request.
///
/// Only this crate can build one, and only after a strategy or a live
/// session vouched for it, so holding a `Principal` means the caller is
/// authenticated. It never carries secret material.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Principal {
    id: Uuid,
    identifier: String,
}

impl Principal {
    pub(crate) fn from_record(record: &StoredCredential) -> Self {
        Self {
            id: record.id,
            identifier: record.identifier.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl FromRequest for Principal {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Principal>()
                .cloned()
                .ok_or(AppError::AuthError(AuthError::Unauthenticated)),
        )
    }
}

/// Warm store handle placed on the request by the pipeline.
#[derive(Clone)]
pub struct Store(pub StoreHandle);

impl FromRequest for Store {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Store>()
                .cloned()
                .ok_or_else(|| AppError::InternalError("credential store not attached to request".into())),
        )
    }
}

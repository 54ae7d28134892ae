//! Helpers shared by feature routes

pub mod pagination;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::api::response::AppError;

pub use pagination::{PaginationMetadata, PaginationParams};

/// Header naming the operator behind a control plane request
pub const ACTOR_HEADER: &str = "x-actor";

/// Operator identity taken from the `x-actor` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
            .map(|actor| Actor(actor.to_string()))
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ACTOR_HEADER} header")))
    }
}

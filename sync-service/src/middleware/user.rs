//! Caller identity extraction.
//!
//! The upstream gateway authenticates the user and forwards the id in the
//! `x-user-id` header. This service does not authenticate on its own.

use crate::models::UserContext;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing x-user-id header")))?;

        tracing::Span::current().record("user_id", user_id);

        Ok(UserContext::new(user_id))
    }
}

//! Caller identity for the order API.
//!
//! The gateway in front of this service authenticates users and forwards
//! their id in `X-User-ID`. Notification routes never use this extractor.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";

#[derive(Debug, Clone)]
pub struct CallerContext {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
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
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
            })?;

        tracing::Span::current().record("user_id", user_id);

        Ok(CallerContext {
            user_id: user_id.to_string(),
        })
    }
}

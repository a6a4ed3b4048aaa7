//! Operator identity for maintenance routes such as provider refresh.
//!
//! An operator is a caller whose user id is on the configured allowlist.
//! An empty allowlist locks the routes for everyone.

use super::caller::CallerContext;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for OperatorContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = CallerContext::from_request_parts(parts, state).await?;
        if !state.operators.contains(&caller.user_id) {
            tracing::warn!(user_id = %caller.user_id, "Maintenance route denied");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "user {} is not an operator",
                caller.user_id
            )));
        }
        Ok(OperatorContext {
            user_id: caller.user_id,
        })
    }
}

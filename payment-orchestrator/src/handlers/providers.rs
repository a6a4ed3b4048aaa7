//! Manual provider configuration refresh.

use crate::dtos::RefreshResponse;
use crate::error::PaymentResult;
use crate::middleware::OperatorContext;
use crate::models::ProviderType;
use crate::services::config_events::{self, ConfigChanged};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

async fn refresh(state: &AppState, operator: &OperatorContext, event: ConfigChanged) -> RefreshResponse {
    tracing::info!(operator = %operator.user_id, provider = ?event.provider, "Provider refresh requested");
    event.apply(&state.registry);

    let broadcast_to = match &state.redis {
        Some(client) => match config_events::publish(client, &state.config_channel, &event).await {
            Ok(receivers) => Some(receivers),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to broadcast configuration change");
                None
            }
        },
        None => None,
    };

    RefreshResponse {
        provider: event.provider,
        broadcast_to,
    }
}

pub async fn refresh_provider(
    State(state): State<AppState>,
    operator: OperatorContext,
    Path(provider): Path<String>,
) -> PaymentResult<Json<RefreshResponse>> {
    let provider: ProviderType = provider.parse()?;
    let response = refresh(
        &state,
        &operator,
        ConfigChanged {
            provider: Some(provider),
        },
    )
    .await;
    Ok(Json(response))
}

pub async fn refresh_all(
    State(state): State<AppState>,
    operator: OperatorContext,
) -> Json<RefreshResponse> {
    Json(refresh(&state, &operator, ConfigChanged { provider: None }).await)
}

//! Gateway notification endpoints. Responses are always the gateway's
//! plain-text acknowledgement.

use crate::models::ProviderType;
use crate::providers::CallbackPayload;
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

async fn dispatch(state: &AppState, provider: &str, payload: CallbackPayload) -> Response {
    let Ok(provider) = provider.parse::<ProviderType>() else {
        tracing::warn!(provider = %provider, "Notification for unknown provider");
        return plain(StatusCode::NOT_FOUND, "fail");
    };
    let ack = state.webhooks.dispatch(provider, payload).await;
    plain(StatusCode::OK, ack.body)
}

/// `POST /notify/:provider` with a form-encoded body.
pub async fn notify_post(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Response {
    dispatch(&state, &provider, CallbackPayload::from_form(&body)).await
}

/// `GET /notify/:provider` with the fields in the query string.
pub async fn notify_get(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let payload = CallbackPayload::from_query(query.as_deref().unwrap_or_default());
    dispatch(&state, &provider, payload).await
}

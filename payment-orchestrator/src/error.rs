//! Error taxonomy for payment orchestration.
//!
//! Every variant maps to a stable machine-readable kind (see
//! [`PaymentError::kind`]) returned to API callers alongside the message.
//! Webhook senders never see these; they only get the provider's
//! accept/reject acknowledgement.

use crate::models::ProviderType;
use crate::stores::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::http::HttpClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Required credential material is absent from the provider configuration.
    #[error("invalid provider configuration: {0}")]
    ConfigurationInvalid(String),

    /// A setting needed to operate (callback domain, provider config) resolves nowhere.
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("failed to initialise {provider} client: {source}")]
    ProviderInitFailed {
        provider: ProviderType,
        #[source]
        source: Box<PaymentError>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Retryable failure left over after the HTTP client's retries:
    /// timeouts, connection errors, 408/429/5xx.
    #[error("payment provider unreachable: {0}")]
    UpstreamTransient(HttpClientError),

    /// The provider answered and declined the operation.
    #[error("payment provider rejected the request: {code}: {message}")]
    UpstreamRejected { code: String, message: String },

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The order's current state does not allow the requested transition.
    #[error("invalid order state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type PaymentResult<T> = Result<T, PaymentError>;

impl From<HttpClientError> for PaymentError {
    fn from(err: HttpClientError) -> Self {
        if err.is_transient() {
            return PaymentError::UpstreamTransient(err);
        }
        match err {
            HttpClientError::Status(response) => PaymentError::UpstreamRejected {
                code: format!("HTTP_{}", response.status),
                message: response.text().chars().take(200).collect(),
            },
            other => PaymentError::Internal(other.to_string()),
        }
    }
}

impl PaymentError {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::ConfigurationInvalid(_) => "CONFIGURATION_INVALID",
            PaymentError::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            PaymentError::ProviderInitFailed { .. } => "PROVIDER_INIT_FAILED",
            PaymentError::InvalidArgument(_) => "INVALID_ARGUMENT",
            PaymentError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            PaymentError::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            PaymentError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::InvalidState(_) => "INVALID_STATE",
            PaymentError::Storage(_) => "STORAGE",
            PaymentError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InvalidState(_) => StatusCode::CONFLICT,
            PaymentError::UpstreamRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::UpstreamTransient(_) | PaymentError::SignatureInvalid(_) => {
                StatusCode::BAD_GATEWAY
            }
            PaymentError::ConfigurationMissing(_)
            | PaymentError::ConfigurationInvalid(_)
            | PaymentError::ProviderInitFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Storage(_) | PaymentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Unwraps [`PaymentError::ProviderInitFailed`] to the construction cause.
    pub fn root_cause(&self) -> &PaymentError {
        match self {
            PaymentError::ProviderInitFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            kind: &'static str,
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            provider_code: Option<String>,
        }

        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Payment request failed");
        } else {
            tracing::info!(kind = self.kind(), error = %self, "Payment request rejected");
        }

        let provider_code = match &self {
            PaymentError::UpstreamRejected { code, .. } => Some(code.clone()),
            _ => None,
        };
        let error = match &self {
            // Storage and internal details stay in the logs.
            PaymentError::Storage(_) | PaymentError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                kind: self.kind(),
                error,
                provider_code,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failure_exposes_construction_cause() {
        let err = PaymentError::ProviderInitFailed {
            provider: ProviderType::Alipay,
            source: Box::new(PaymentError::ConfigurationInvalid("app cert".into())),
        };

        assert_eq!(err.kind(), "PROVIDER_INIT_FAILED");
        assert_eq!(err.root_cause().kind(), "CONFIGURATION_INVALID");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn business_rejection_is_unprocessable() {
        let err = PaymentError::UpstreamRejected {
            code: "ACQ.TRADE_HAS_FINISHED".into(),
            message: "trade finished".into(),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_string().contains("ACQ.TRADE_HAS_FINISHED"));
    }

    #[test]
    fn http_failures_split_by_retryability() {
        let timeout = PaymentError::from(HttpClientError::Timeout(std::time::Duration::from_secs(3)));
        assert_eq!(timeout.kind(), "UPSTREAM_TRANSIENT");
        assert_eq!(timeout.status_code(), StatusCode::BAD_GATEWAY);

        let malformed = PaymentError::from(HttpClientError::InvalidRequest("bad url".into()));
        assert_eq!(malformed.kind(), "INTERNAL");
    }
}

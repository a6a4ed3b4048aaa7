use super::error::HttpClientError;
use super::request::{HttpRequest, HttpResponse};
use std::time::Duration;

/// Receives request, response and error events from [`super::HttpClient`].
pub trait HttpLogger: Send + Sync {
    fn on_request(&self, request: &HttpRequest);
    fn on_response(&self, request: &HttpRequest, response: &HttpResponse, elapsed: Duration);
    fn on_error(&self, request: &HttpRequest, error: &HttpClientError, elapsed: Duration);
}

/// Emits structured `tracing` events. Bodies are logged at trace level only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HttpLogger for TracingLogger {
    fn on_request(&self, request: &HttpRequest) {
        tracing::debug!(
            request_id = %request.context.request_id,
            attempt = request.context.attempt,
            method = %request.method,
            url = %request.redacted_url(),
            "Outbound request"
        );
    }

    fn on_response(&self, request: &HttpRequest, response: &HttpResponse, elapsed: Duration) {
        if response.is_success() {
            tracing::info!(
                request_id = %request.context.request_id,
                attempt = request.context.attempt,
                method = %request.method,
                url = %request.redacted_url(),
                status = response.status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Outbound response"
            );
        } else {
            tracing::warn!(
                request_id = %request.context.request_id,
                attempt = request.context.attempt,
                method = %request.method,
                url = %request.redacted_url(),
                status = response.status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Outbound response with error status"
            );
        }
        tracing::trace!(
            request_id = %request.context.request_id,
            body = %response.text(),
            "Outbound response body"
        );
    }

    fn on_error(&self, request: &HttpRequest, error: &HttpClientError, elapsed: Duration) {
        tracing::warn!(
            request_id = %request.context.request_id,
            attempt = request.context.attempt,
            method = %request.method,
            url = %request.redacted_url(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = %error,
            "Outbound request failed"
        );
    }
}

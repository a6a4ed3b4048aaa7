use super::request::HttpResponse;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpClientError {
    /// No response arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, TLS or protocol failure before a response was read.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// A response arrived with a non-2xx status.
    #[error("upstream returned HTTP {}", .0.status)]
    Status(Box<HttpResponse>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl HttpClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpClientError::Status(response) => Some(response.status),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            HttpClientError::Status(response) => Some(response),
            _ => None,
        }
    }

    /// True for failures that may succeed when attempted again later.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpClientError::Timeout(_) | HttpClientError::Transport(_) => true,
            HttpClientError::Status(response) => {
                response.status >= 500 || matches!(response.status, 408 | 429)
            }
            HttpClientError::InvalidRequest(_) | HttpClientError::Decode(_) => false,
        }
    }
}

use super::error::HttpClientError;
use reqwest::{Method, header::HeaderMap};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use uuid::Uuid;

/// Per-request state that travels with the request across retries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Zero for the original send, incremented before each retry.
    pub attempt: u32,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            attempt: 0,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

/// An outbound request. Cloned bodies are resent verbatim on retry.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Overrides the client-wide timeout for this request.
    pub timeout: Option<Duration>,
    pub skip_logging: bool,
    pub skip_retry: bool,
    pub context: RequestContext,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            skip_logging: false,
            skip_retry: false,
            context: RequestContext::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Encode `form` as `application/x-www-form-urlencoded`.
    pub fn form<T: Serialize + ?Sized>(self, form: &T) -> Result<Self, HttpClientError> {
        let encoded = serde_urlencoded::to_string(form)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        Ok(self
            .header(
                "content-type",
                "application/x-www-form-urlencoded;charset=utf-8",
            )
            .body(encoded))
    }

    pub fn json<T: Serialize + ?Sized>(self, json: &T) -> Result<Self, HttpClientError> {
        let encoded = serde_json::to_vec(json)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        Ok(self.header("content-type", "application/json").body(encoded))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    pub fn skip_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    /// URL without its query string, safe to put in logs.
    pub fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Total sends performed to obtain this response, including the first.
    pub attempts: u32,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpClientError> {
        serde_json::from_slice(&self.body).map_err(HttpClientError::Decode)
    }
}

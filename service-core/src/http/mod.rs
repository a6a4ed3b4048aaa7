//! Outbound HTTP transport shared by every third-party integration.
//!
//! Wraps `reqwest` with a per-call timeout, opt-in retries on transient
//! status codes and pluggable request/response logging.

pub mod client;
pub mod error;
pub mod logger;
pub mod request;
pub mod retry;

pub use client::{HttpClient, HttpClientConfig};
pub use error::HttpClientError;
pub use logger::{HttpLogger, TracingLogger};
pub use request::{HttpRequest, HttpResponse, RequestContext};
pub use retry::{
    AlwaysRetry, DEFAULT_RETRY_STATUS_CODES, RetryCause, RetryPolicy, RetryPredicate,
};
pub use reqwest::Method;

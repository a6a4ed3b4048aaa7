//! Retry policy for the outbound client.
//!
//! A retry happens only when a response was received with a retryable
//! status (or, when explicitly enabled, a timeout occurred), attempts remain,
//! and the pluggable predicate agrees.

use super::request::{HttpResponse, RequestContext};
use std::time::Duration;

pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Why a retry is being considered.
#[derive(Debug)]
pub enum RetryCause<'a> {
    Status(&'a HttpResponse),
    Timeout(Duration),
}

/// Last say on a retry the [`RetryPolicy`] already allows.
///
/// A predicate can only veto: it is consulted after the policy, so a
/// timeout is retried only when `retry_on_timeout` is set and the
/// predicate also returns `true`.
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, context: &RequestContext, cause: &RetryCause<'_>) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&RequestContext, &RetryCause<'_>) -> bool + Send + Sync,
{
    fn should_retry(&self, context: &RequestContext, cause: &RetryCause<'_>) -> bool {
        self(context, cause)
    }
}

/// Default predicate: defers entirely to [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl RetryPredicate for AlwaysRetry {
    fn should_retry(&self, _context: &RequestContext, _cause: &RetryCause<'_>) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the original attempt. Zero disables retrying.
    pub retries: u32,
    /// Fixed wait before each retry.
    pub delay: Duration,
    pub status_codes: Vec<u16>,
    /// Timeouts carry no response, so the upstream may already have acted.
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: Duration::from_millis(1000),
            status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            ..Default::default()
        }
    }

    /// Whether the policy itself permits another attempt.
    pub fn eligible(&self, context: &RequestContext, cause: &RetryCause<'_>) -> bool {
        if context.attempt >= self.retries {
            return false;
        }

        match cause {
            RetryCause::Status(response) => self.status_codes.contains(&response.status),
            RetryCause::Timeout(_) => self.retry_on_timeout,
        }
    }
}

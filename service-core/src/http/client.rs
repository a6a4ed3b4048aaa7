use super::error::HttpClientError;
use super::logger::{HttpLogger, TracingLogger};
use super::request::{HttpRequest, HttpResponse};
use super::retry::{AlwaysRetry, RetryCause, RetryPolicy, RetryPredicate};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applied to every request without its own timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: concat!("service-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    config: Arc<HttpClientConfig>,
    predicate: Arc<dyn RetryPredicate>,
    logger: Arc<dyn HttpLogger>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(HttpClientError::Transport)?;

        Ok(Self {
            inner,
            config: Arc::new(config),
            predicate: Arc::new(AlwaysRetry),
            logger: Arc::new(TracingLogger),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn HttpLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_retry_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Send `request`, retrying per the client's [`RetryPolicy`].
    ///
    /// When no retry applies, the last failure is returned unchanged: a
    /// non-2xx response as [`HttpClientError::Status`], otherwise the
    /// transport error.
    pub async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        loop {
            if !request.skip_logging {
                self.logger.on_request(&request);
            }

            let started = Instant::now();
            let outcome = self.send_once(&request).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(response) if response.is_success() => {
                    if !request.skip_logging {
                        self.logger.on_response(&request, &response, elapsed);
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    if !request.skip_logging {
                        self.logger.on_response(&request, &response, elapsed);
                    }
                    if self.should_retry(&request, &RetryCause::Status(&response)) {
                        self.wait_before_retry(&mut request).await;
                        continue;
                    }
                    return Err(HttpClientError::Status(Box::new(response)));
                }
                Err(error) => {
                    if !request.skip_logging {
                        self.logger.on_error(&request, &error, elapsed);
                    }
                    if let HttpClientError::Timeout(after) = error
                        && self.should_retry(&request, &RetryCause::Timeout(after))
                    {
                        self.wait_before_retry(&mut request).await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    fn should_retry(&self, request: &HttpRequest, cause: &RetryCause<'_>) -> bool {
        !request.skip_retry
            && self.config.retry.eligible(&request.context, cause)
            && self.predicate.should_retry(&request.context, cause)
    }

    async fn wait_before_retry(&self, request: &mut HttpRequest) {
        request.context.attempt += 1;
        if !request.skip_logging {
            tracing::info!(
                request_id = %request.context.request_id,
                attempt = request.context.attempt,
                delay_ms = self.config.retry.delay.as_millis() as u64,
                url = %request.redacted_url(),
                "Retrying outbound request"
            );
        }
        tokio::time::sleep(self.config.retry.delay).await;
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let timeout = request.timeout.unwrap_or(self.config.timeout);

        let mut builder = self
            .inner
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            attempts: request.context.attempt + 1,
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> HttpClientError {
    if error.is_timeout() {
        HttpClientError::Timeout(timeout)
    } else {
        HttpClientError::Transport(error)
    }
}

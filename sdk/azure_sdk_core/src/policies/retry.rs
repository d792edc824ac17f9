use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Headers, Request, Response};
use crate::pipeline::{cancellable_sleep, send_next, Policy};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (800 milliseconds).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(800);

/// Default upper bound for a single computed delay (60 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Determines if an HTTP status code represents a transient failure that is
/// retried by default.
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// The same delay before every retry.
    Fixed,
    /// `initial_delay * 2^attempt` with ±25% jitter.
    #[default]
    Exponential,
}

/// Configuration for automatic retries.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of retries (not counting the initial request).
    pub max_retries: u32,
    pub mode: RetryMode,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retry_on_status_codes: Vec<u16>,
    pub retry_on_timeouts: bool,
    pub retry_on_connection_errors: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            mode: RetryMode::Exponential,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_on_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            retry_on_timeouts: true,
            retry_on_connection_errors: true,
        }
    }
}

impl RetryOptions {
    /// Options that never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            mode: RetryMode::Fixed,
            initial_delay: delay,
            ..Self::default()
        }
    }

    /// The computed delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.mode {
            RetryMode::Fixed => self.initial_delay.min(self.max_delay),
            RetryMode::Exponential => {
                let base = self
                    .initial_delay
                    .saturating_mul(2_u32.saturating_pow(attempt))
                    .min(self.max_delay);
                // jitter factor in [0.75, 1.25]
                let jitter = 0.75 + fastrand::f64() * 0.5;
                base.mul_f64(jitter).min(self.max_delay)
            }
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status_codes.contains(&status)
    }

    pub fn should_retry_error(&self, error: &AzureError) -> bool {
        (self.retry_on_timeouts && error.is_timeout())
            || (self.retry_on_connection_errors && error.is_connection_error())
    }
}

/// Number of retries performed so far, stored in the request context before
/// each resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryCount(pub u32);

/// The delay a response asks for, from `retry-after-ms`,
/// `x-ms-retry-after-ms` (milliseconds) or `Retry-After` (whole seconds).
pub fn retry_after(headers: &Headers) -> Option<Duration> {
    for name in [headers::RETRY_AFTER_MS, headers::X_MS_RETRY_AFTER_MS] {
        if let Some(ms) = headers.get(name).and_then(|v| v.trim().parse::<f64>().ok()) {
            if ms.is_finite() && ms >= 0.0 {
                return Some(Duration::from_secs_f64(ms / 1000.0));
            }
        }
    }
    headers
        .get(headers::RETRY_AFTER)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Resends the rest of the chain on retryable statuses and transient errors.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    fn delay_after(&self, result: &AzureResult<Response>, attempt: u32) -> Option<Duration> {
        match result {
            Ok(response) if self.options.should_retry_status(response.status()) => Some(
                retry_after(response.headers()).unwrap_or_else(|| self.options.delay_for(attempt)),
            ),
            Err(err) if self.options.should_retry_error(err) => {
                Some(self.options.delay_for(attempt))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn send(&self, request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                request.context_mut().insert(RetryCount(attempt));
            }

            let result = send_next(request, next).await;
            if attempt >= self.options.max_retries {
                return result;
            }
            let Some(delay) = self.delay_after(&result, attempt) else {
                return result;
            };

            tracing::debug!(
                attempt = attempt + 1,
                max_retries = self.options.max_retries,
                delay_ms = delay.as_millis() as u64,
                status = result.as_ref().ok().map(Response::status),
                "retrying request"
            );

            let token = request.context().get::<CancellationToken>().cloned();
            cancellable_sleep(token.as_ref(), delay).await?;
            attempt += 1;
        }
    }
}

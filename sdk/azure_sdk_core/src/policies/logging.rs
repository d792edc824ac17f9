use std::collections::HashSet;

use url::Url;

use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Headers, Request, Response};
use crate::pipeline::SansIoPolicy;

const REDACTED: &str = "REDACTED";

/// Headers logged with their values by default.
pub const DEFAULT_ALLOWED_HEADERS: &[&str] = &[
    "accept",
    "cache-control",
    "content-length",
    "content-type",
    "date",
    "etag",
    "expires",
    "last-modified",
    "retry-after",
    "retry-after-ms",
    "server",
    "traceparent",
    "user-agent",
    "x-ms-client-request-id",
    "x-ms-request-id",
    "x-ms-retry-after-ms",
];

/// Query parameters logged with their values by default.
pub const DEFAULT_ALLOWED_QUERY_PARAMS: &[&str] = &["api-version"];

/// Logs each attempt's request and outcome at `debug` level.
///
/// Header and query values outside the allow lists are replaced with
/// `REDACTED`. `Authorization` is always redacted.
#[derive(Debug, Clone)]
pub struct LoggingPolicy {
    allowed_headers: HashSet<String>,
    allowed_query_params: HashSet<String>,
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            allowed_headers: DEFAULT_ALLOWED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            allowed_query_params: DEFAULT_ALLOWED_QUERY_PARAMS
                .iter()
                .map(|q| q.to_string())
                .collect(),
        }
    }
}

impl LoggingPolicy {
    /// Log the value of header `name` instead of redacting it.
    pub fn allow_header(mut self, name: &str) -> Self {
        self.allowed_headers.insert(name.to_ascii_lowercase());
        self
    }

    /// Log the value of query parameter `name` instead of redacting it.
    pub fn allow_query_param(mut self, name: &str) -> Self {
        self.allowed_query_params.insert(name.to_string());
        self
    }

    /// The URL with non-allow-listed query values redacted.
    pub fn redact_url(&self, url: &Url) -> String {
        if url.query().is_none() {
            return url.to_string();
        }
        let mut redacted = url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let value = if self.allowed_query_params.contains(&*k) {
                    v.into_owned()
                } else {
                    REDACTED.to_string()
                };
                (k.into_owned(), value)
            })
            .collect();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
        redacted.to_string()
    }

    /// Headers rendered as `name: value` with values redacted as needed.
    pub fn redact_headers(&self, list: &Headers) -> String {
        list.iter()
            .map(|(name, value)| {
                let lower = name.to_ascii_lowercase();
                let shown = if lower != headers::AUTHORIZATION.to_ascii_lowercase()
                    && self.allowed_headers.contains(&lower)
                {
                    value
                } else {
                    REDACTED
                };
                format!("{name}: {shown}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl SansIoPolicy for LoggingPolicy {
    fn on_request(&self, request: &mut Request) -> AzureResult<()> {
        tracing::debug!(
            method = %request.method(),
            url = %self.redact_url(request.url()),
            headers = %self.redact_headers(request.headers()),
            "sending request"
        );
        Ok(())
    }

    fn on_response(&self, _request: &mut Request, response: &Response) {
        tracing::debug!(
            status = response.status(),
            headers = %self.redact_headers(response.headers()),
            "received response"
        );
    }

    fn on_exception(&self, request: &mut Request, error: &AzureError) {
        tracing::debug!(
            method = %request.method(),
            url = %self.redact_url(request.url()),
            error = %error,
            "request failed"
        );
    }
}

//! Built-in pipeline policies.

mod auth;
mod distributed_tracing;
mod headers;
mod logging;
mod retry;
mod transport;

pub use auth::{BearerTokenPolicy, KeyCredentialPolicy, TOKEN_REFRESH_WINDOW};
pub use distributed_tracing::{ActiveSpan, DistributedTracingPolicy};
pub use headers::{new_request_id, HeadersPolicy, RequestIdPolicy, UserAgentPolicy, USER_AGENT_ENV};
pub use logging::{LoggingPolicy, DEFAULT_ALLOWED_HEADERS, DEFAULT_ALLOWED_QUERY_PARAMS};
pub use retry::{
    is_retriable_status, retry_after, RetryCount, RetryMode, RetryOptions, RetryPolicy,
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STATUS_CODES,
};
pub use transport::{HttpClient, TransportPolicy};

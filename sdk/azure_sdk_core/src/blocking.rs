//! Synchronous wrappers over the async pipeline.
//!
//! Blocking calls run the same futures as the async API on a private
//! current-thread tokio runtime. They must not be called from inside an
//! async runtime.
//!
//! ```rust,no_run
//! use azure_sdk_core::blocking;
//! use azure_sdk_core::http::{Method, Request};
//! use azure_sdk_core::pipeline::Pipeline;
//! use url::Url;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = blocking::Pipeline::new(Pipeline::builder().build()?);
//! let mut request = Request::new(Method::GET, Url::parse("https://example.com")?);
//! let response = pipeline.send(&mut request)?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

use crate::error::{AzureError, AzureResult};
use crate::http::{Request, Response};
use crate::pipeline;

fn runtime() -> AzureResult<&'static Runtime> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();

    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = Builder::new_current_thread().enable_all().build()?;
    // Another thread may have won the race; its runtime is used instead.
    let _ = RUNTIME.set(runtime);
    RUNTIME
        .get()
        .ok_or_else(|| AzureError::Io(std::io::Error::other("blocking runtime unavailable")))
}

/// Drive `future` to completion on the blocking runtime.
///
/// # Errors
///
/// Fails if called from within an async runtime or if the runtime cannot
/// be created.
pub fn block_on<F: Future>(future: F) -> AzureResult<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(AzureError::Io(std::io::Error::other(
            "blocking calls cannot be made from within an async runtime",
        )));
    }
    Ok(runtime()?.block_on(future))
}

/// A [`pipeline::Pipeline`] driven synchronously.
#[derive(Debug, Clone)]
pub struct Pipeline {
    inner: pipeline::Pipeline,
}

impl Pipeline {
    pub fn new(inner: pipeline::Pipeline) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &pipeline::Pipeline {
        &self.inner
    }

    /// Send a request through every policy and wait for the response.
    pub fn send(&self, request: &mut Request) -> AzureResult<Response> {
        block_on(self.inner.send(request))?
    }
}

impl From<pipeline::Pipeline> for Pipeline {
    fn from(inner: pipeline::Pipeline) -> Self {
        Self::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::policies::{RetryOptions, TransportPolicy};
    use crate::test_support::MockHttpClient;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://example.com/items").unwrap())
    }

    #[test]
    fn blocking_send_returns_response() {
        let transport = Arc::new(MockHttpClient::new().with_status(204));
        let pipeline = Pipeline::new(pipeline::Pipeline::new(vec![Arc::new(
            TransportPolicy::new(transport.clone()),
        )]));

        let response = pipeline.send(&mut request()).unwrap();
        assert_eq!(response.status(), 204);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn blocking_send_retries_with_real_sleep() {
        let transport = Arc::new(
            MockHttpClient::new()
                .with_status(503)
                .with_status(200),
        );
        let inner = pipeline::Pipeline::builder()
            .retry(RetryOptions::fixed(Duration::from_millis(5), 2))
            .tracing(crate::instrumentation::TracingSettings::disabled())
            .transport(transport.clone())
            .build()
            .unwrap();

        let response = Pipeline::from(inner).send(&mut request()).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn block_on_inside_runtime_is_an_error() {
        let err = block_on(async {}).unwrap_err();
        assert!(matches!(err, AzureError::Io(_)));
    }
}

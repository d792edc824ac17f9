//! The policy chain every request is sent through.
//!
//! A [`Pipeline`] is an ordered list of [`Policy`] objects. The first policy is
//! the outermost: it sees the request first and the response last. Each policy
//! hands the request to the rest of the chain with [`send_next`], so the chain
//! behaves like an onion:
//!
//! ```text
//! request-id → headers → user-agent → retry ┬→ auth → tracing → logging → transport
//!                                           └── repeated once per attempt
//! ```
//!
//! Policies that only need to look at the request on the way in and at the
//! outcome on the way out implement [`SansIoPolicy`] and are adapted with
//! [`SansIo`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::credentials::TokenCredential;
use crate::error::{AzureError, AzureResult};
use crate::http::{Headers, Request, Response};
use crate::instrumentation::{Attributes, SpanNamer, TracingSettings};
use crate::policies::{
    BearerTokenPolicy, DistributedTracingPolicy, HeadersPolicy, HttpClient, LoggingPolicy,
    RequestIdPolicy, RetryOptions, RetryPolicy, TransportPolicy, UserAgentPolicy,
};

/// A step in the pipeline.
///
/// Implementations call [`send_next`] with `next` to continue the chain,
/// or return a response themselves (the transport does this).
#[async_trait]
pub trait Policy: Send + Sync {
    async fn send(&self, request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response>;
}

/// A policy that never performs I/O itself.
///
/// For every attempt that reaches it, `on_request` runs once followed by
/// exactly one of `on_response` or `on_exception`.
pub trait SansIoPolicy: Send + Sync {
    fn on_request(&self, _request: &mut Request) -> AzureResult<()> {
        Ok(())
    }

    fn on_response(&self, _request: &mut Request, _response: &Response) {}

    fn on_exception(&self, _request: &mut Request, _error: &AzureError) {}
}

/// Adapts a [`SansIoPolicy`] to [`Policy`].
#[derive(Debug, Clone)]
pub struct SansIo<P>(pub P);

#[async_trait]
impl<P: SansIoPolicy> Policy for SansIo<P> {
    async fn send(&self, request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
        if let Err(err) = self.0.on_request(request) {
            self.0.on_exception(request, &err);
            return Err(err);
        }

        match send_next(request, next).await {
            Ok(response) => {
                self.0.on_response(request, &response);
                Ok(response)
            }
            Err(err) => {
                self.0.on_exception(request, &err);
                Err(err)
            }
        }
    }
}

/// Run the first policy of `next` with the remainder of the chain.
pub async fn send_next(request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
    match next.split_first() {
        Some((policy, rest)) => policy.send(request, rest).await,
        None => Err(AzureError::MissingConfig(
            "pipeline ended without a transport policy".into(),
        )),
    }
}

/// Sleep for `delay`, returning [`AzureError::Cancelled`] as soon as `token`
/// is cancelled.
pub(crate) async fn cancellable_sleep(
    token: Option<&CancellationToken>,
    delay: Duration,
) -> AzureResult<()> {
    match token {
        Some(token) => {
            if token.is_cancelled() {
                return Err(AzureError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AzureError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// An immutable, cheaply cloneable policy chain.
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
}

impl Pipeline {
    /// Create a pipeline from an explicit policy list. The last policy must
    /// produce a response without calling further (normally a
    /// [`TransportPolicy`]).
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self {
            policies: policies.into(),
        }
    }

    /// Create a builder that assembles the standard policy set.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Send a request through every policy.
    pub async fn send(&self, request: &mut Request) -> AzureResult<Response> {
        send_next(request, &self.policies).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies.len())
            .finish()
    }
}

/// Builder for a [`Pipeline`] with the standard policies in their fixed order.
///
/// Policies added with [`per_call`](Self::per_call) run once per operation,
/// outside the retry loop. Policies added with [`per_retry`](Self::per_retry)
/// run on every attempt, after authentication.
#[derive(Default)]
pub struct PipelineBuilder {
    component: Option<(String, String)>,
    application_id: Option<String>,
    headers: Headers,
    per_call: Vec<Arc<dyn Policy>>,
    per_retry: Vec<Arc<dyn Policy>>,
    retry: Option<RetryOptions>,
    credential: Option<(Arc<dyn TokenCredential>, Vec<String>)>,
    allow_insecure_http: bool,
    tracing: Option<TracingSettings>,
    span_namer: Option<SpanNamer>,
    span_attributes: Attributes,
    logging: Option<LoggingPolicy>,
    transport: Option<Arc<dyn HttpClient>>,
}

impl PipelineBuilder {
    /// Name and version reported in the `User-Agent` header.
    pub fn component(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.component = Some((name.into(), version.into()));
        self
    }

    /// Application id prefixed to the `User-Agent` header.
    pub fn application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    /// Add a header sent with every request unless the request sets it.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a policy that runs once per operation, before retries.
    pub fn per_call(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call.push(policy);
        self
    }

    /// Add a policy that runs on every attempt, after authentication.
    pub fn per_retry(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry.push(policy);
        self
    }

    /// Defaults to [`RetryOptions::default`].
    pub fn retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(options);
        self
    }

    /// Authenticate every request with a bearer token for `scopes`.
    pub fn credential(
        mut self,
        credential: Arc<dyn TokenCredential>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.credential = Some((credential, scopes.into_iter().map(Into::into).collect()));
        self
    }

    /// Allow bearer tokens over plain `http`. Only meant for local test servers.
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    /// Defaults to [`TracingSettings::from_env`].
    pub fn tracing(mut self, settings: TracingSettings) -> Self {
        self.tracing = Some(settings);
        self
    }

    pub fn span_namer(mut self, namer: SpanNamer) -> Self {
        self.span_namer = Some(namer);
        self
    }

    /// Attributes added to every HTTP span.
    pub fn span_attributes(mut self, attributes: Attributes) -> Self {
        self.span_attributes = attributes;
        self
    }

    /// Defaults to [`LoggingPolicy::default`].
    pub fn logging(mut self, policy: LoggingPolicy) -> Self {
        self.logging = Some(policy);
        self
    }

    /// Defaults to a `reqwest::Client` with default settings.
    pub fn transport(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(client);
        self
    }

    /// Assemble the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the default HTTP client cannot be created.
    pub fn build(self) -> AzureResult<Pipeline> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(reqwest::Client::builder().build()?) as Arc<dyn HttpClient>,
        };

        let (component, version) = self.component.unwrap_or_else(|| {
            (
                env!("CARGO_PKG_NAME").to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )
        });

        let mut policies: Vec<Arc<dyn Policy>> = vec![
            Arc::new(SansIo(RequestIdPolicy)),
            Arc::new(SansIo(HeadersPolicy::new(self.headers))),
            Arc::new(SansIo(UserAgentPolicy::new(
                &component,
                &version,
                self.application_id.as_deref(),
            ))),
        ];
        policies.extend(self.per_call);
        policies.push(Arc::new(RetryPolicy::new(self.retry.unwrap_or_default())));
        if let Some((credential, scopes)) = self.credential {
            policies.push(Arc::new(
                BearerTokenPolicy::new(credential, scopes).allow_http(self.allow_insecure_http),
            ));
        }
        policies.extend(self.per_retry);

        let mut tracing_policy =
            DistributedTracingPolicy::new(self.tracing.unwrap_or_else(TracingSettings::from_env))
                .with_attributes(self.span_attributes);
        if let Some(namer) = self.span_namer {
            tracing_policy = tracing_policy.with_namer(namer);
        }
        policies.push(Arc::new(SansIo(tracing_policy)));
        policies.push(Arc::new(SansIo(self.logging.unwrap_or_default())));
        policies.push(Arc::new(TransportPolicy::new(transport)));

        tracing::debug!(policies = policies.len(), "built pipeline");
        Ok(Pipeline::new(policies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::test_support::MockHttpClient;
    use std::sync::Mutex;
    use url::Url;

    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl SansIoPolicy for Recorder {
        fn on_request(&self, _request: &mut Request) -> AzureResult<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:request", self.name));
            Ok(())
        }

        fn on_response(&self, _request: &mut Request, response: &Response) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:response:{}", self.name, response.status()));
        }

        fn on_exception(&self, _request: &mut Request, _error: &AzureError) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:exception", self.name));
        }
    }

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://example.com/items").unwrap())
    }

    #[tokio::test]
    async fn sans_io_policies_run_as_onion() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(MockHttpClient::new().with_status(200));
        let pipeline = Pipeline::new(vec![
            Arc::new(SansIo(Recorder {
                name: "outer",
                events: events.clone(),
            })),
            Arc::new(SansIo(Recorder {
                name: "inner",
                events: events.clone(),
            })),
            Arc::new(TransportPolicy::new(transport)),
        ]);

        let response = pipeline.send(&mut request()).await.unwrap();
        assert_eq!(response.status(), 200);

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "outer:request",
                "inner:request",
                "inner:response:200",
                "outer:response:200",
            ]
        );
    }

    #[tokio::test]
    async fn transport_errors_reach_on_exception() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(
            MockHttpClient::new().with_error(|| AzureError::Io(std::io::Error::other("reset"))),
        );
        let pipeline = Pipeline::new(vec![
            Arc::new(SansIo(Recorder {
                name: "only",
                events: events.clone(),
            })),
            Arc::new(TransportPolicy::new(transport)),
        ]);

        let err = pipeline.send(&mut request()).await.unwrap_err();
        assert!(matches!(err, AzureError::Io(_)));
        assert_eq!(*events.lock().unwrap(), vec!["only:request", "only:exception"]);
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let pipeline = Pipeline::new(Vec::new());
        let err = pipeline.send(&mut request()).await.unwrap_err();
        assert!(matches!(err, AzureError::MissingConfig(_)));
    }

    #[tokio::test]
    async fn builder_adds_standard_headers() {
        let transport = Arc::new(MockHttpClient::new().with_status(200));
        let pipeline = Pipeline::builder()
            .component("azure_sdk_test", "1.2.3")
            .header("x-custom", "yes")
            .tracing(TracingSettings::disabled())
            .transport(transport.clone())
            .build()
            .unwrap();

        pipeline.send(&mut request()).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].headers.contains("x-ms-client-request-id"));
        assert_eq!(sent[0].headers.get("x-custom"), Some("yes"));
        assert!(sent[0]
            .headers
            .get("user-agent")
            .unwrap()
            .starts_with("azsdk-rust-azure_sdk_test/1.2.3"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellable_sleep_observes_token() {
        let token = CancellationToken::new();
        let sleeper = {
            let token = token.clone();
            tokio::spawn(async move {
                cancellable_sleep(Some(&token), Duration::from_secs(3600)).await
            })
        };
        token.cancel();

        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(AzureError::Cancelled)));
    }
}

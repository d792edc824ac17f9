//! A generic service client built on the [`Pipeline`].
//!
//! [`ServiceClient`] holds a service endpoint, an API version and a fully
//! configured pipeline. Service crates (such as Key Vault secrets) wrap it
//! and add typed operations.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_sdk_core::client::ServiceClient;
//! use azure_sdk_core::credentials::EnvironmentCredential;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ServiceClient::builder()
//!     .endpoint("https://my-vault.vault.azure.net")
//!     .credential(Arc::new(EnvironmentCredential::new()), ["https://vault.azure.net/.default"])
//!     .api_version("7.5")
//!     .build()?;
//!
//! let response = client.get("secrets/my-secret").await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::credentials::TokenCredential;
use crate::error::{AzureError, AzureResult};
use crate::http::{Method, Request, Response};
use crate::instrumentation::{Attributes, TracingSettings};
use crate::pipeline::{Pipeline, Policy};
use crate::policies::{HttpClient, LoggingPolicy, RetryOptions};

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Query parameter carrying the API version.
pub const API_VERSION_PARAM: &str = "api-version";

/// Options shared by every client: retries, tracing, timeouts, and custom
/// policies.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub retry: RetryOptions,
    /// Defaults to [`TracingSettings::from_env`].
    pub tracing: Option<TracingSettings>,
    /// Attributes added to every HTTP span.
    pub span_attributes: Attributes,
    /// Prefixed to the `User-Agent` header.
    pub application_id: Option<String>,
    pub logging: Option<LoggingPolicy>,
    /// Ignored when `transport` is set.
    pub connect_timeout: Option<Duration>,
    /// Ignored when `transport` is set.
    pub read_timeout: Option<Duration>,
    /// Allow bearer tokens over plain `http`. Only meant for local test servers.
    pub allow_insecure_http: bool,
    pub per_call_policies: Vec<Arc<dyn Policy>>,
    pub per_retry_policies: Vec<Arc<dyn Policy>>,
    pub transport: Option<Arc<dyn HttpClient>>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("retry", &self.retry)
            .field("application_id", &self.application_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .field("per_call_policies", &self.per_call_policies.len())
            .field("per_retry_policies", &self.per_retry_policies.len())
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    /// Assemble the pipeline for a component, authenticating with
    /// `credential` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn build_pipeline(
        &self,
        component: &str,
        version: &str,
        credential: Option<(Arc<dyn TokenCredential>, Vec<String>)>,
    ) -> AzureResult<Pipeline> {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                let client = reqwest::Client::builder()
                    .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                    .timeout(self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT))
                    .build()?;
                Arc::new(client) as Arc<dyn HttpClient>
            }
        };

        let mut builder = Pipeline::builder()
            .component(component, version)
            .retry(self.retry.clone())
            .allow_insecure_http(self.allow_insecure_http)
            .span_attributes(self.span_attributes.clone())
            .transport(transport);
        if let Some(app) = &self.application_id {
            builder = builder.application_id(app.clone());
        }
        if let Some(settings) = &self.tracing {
            builder = builder.tracing(settings.clone());
        }
        if let Some(logging) = &self.logging {
            builder = builder.logging(logging.clone());
        }
        if let Some((credential, scopes)) = credential {
            builder = builder.credential(credential, scopes);
        }
        for policy in &self.per_call_policies {
            builder = builder.per_call(policy.clone());
        }
        for policy in &self.per_retry_policies {
            builder = builder.per_retry(policy.clone());
        }
        builder.build()
    }
}

/// A client for one service endpoint.
///
/// Cheaply cloneable; clones share the pipeline.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    endpoint: Url,
    api_version: Option<String>,
    pipeline: Pipeline,
}

impl ServiceClient {
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::default()
    }

    /// Create a client from an already assembled pipeline.
    pub fn new(endpoint: Url, api_version: Option<String>, pipeline: Pipeline) -> Self {
        Self {
            endpoint,
            api_version,
            pipeline,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Build a full URL for an API path, with the `api-version` query
    /// parameter when the client has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined to the endpoint URL.
    pub fn url(&self, path: &str) -> AzureResult<Url> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|e| AzureError::invalid_endpoint_with_source("failed to construct URL", e))?;
        if let Some(version) = &self.api_version {
            url.query_pairs_mut().append_pair(API_VERSION_PARAM, version);
        }
        Ok(url)
    }

    /// A request for `path` on this client's endpoint.
    pub fn request(&self, method: Method, path: &str) -> AzureResult<Request> {
        Ok(Request::new(method, self.url(path)?))
    }

    /// Send a request through the pipeline and turn error statuses into
    /// errors.
    pub async fn send(&self, request: &mut Request) -> AzureResult<Response> {
        self.pipeline.send(request).await?.into_result()
    }

    #[tracing::instrument(name = "azure::client::get", skip(self))]
    pub async fn get(&self, path: &str) -> AzureResult<Response> {
        let mut request = self.request(Method::GET, path)?;
        self.send(&mut request).await
    }

    #[tracing::instrument(name = "azure::client::put", skip(self, body))]
    pub async fn put<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> AzureResult<Response> {
        let mut request = self.request(Method::PUT, path)?;
        request.set_json(body)?;
        self.send(&mut request).await
    }

    #[tracing::instrument(name = "azure::client::post", skip(self, body))]
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> AzureResult<Response> {
        let mut request = self.request(Method::POST, path)?;
        request.set_json(body)?;
        self.send(&mut request).await
    }

    #[tracing::instrument(name = "azure::client::delete", skip(self))]
    pub async fn delete(&self, path: &str) -> AzureResult<Response> {
        let mut request = self.request(Method::DELETE, path)?;
        self.send(&mut request).await
    }
}

/// Builder for a [`ServiceClient`].
#[derive(Debug, Default)]
pub struct ServiceClientBuilder {
    endpoint: Option<String>,
    endpoint_env: Option<String>,
    credential: Option<CredentialConfig>,
    api_version: Option<String>,
    component: Option<(String, String)>,
    options: ClientOptions,
}

struct CredentialConfig {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ServiceClientBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Environment variable read for the endpoint when none is set
    /// explicitly.
    pub fn endpoint_env(mut self, name: impl Into<String>) -> Self {
        self.endpoint_env = Some(name.into());
        self
    }

    /// Authenticate requests with bearer tokens for `scopes`.
    pub fn credential(
        mut self,
        credential: Arc<dyn TokenCredential>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.credential = Some(CredentialConfig {
            credential,
            scopes: scopes.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Name and version reported in the `User-Agent` header.
    pub fn component(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.component = Some((name.into(), version.into()));
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn tracing(mut self, settings: TracingSettings) -> Self {
        self.options.tracing = Some(settings);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = Some(timeout);
        self
    }

    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.options.allow_insecure_http = allow;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.options.transport = Some(transport);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint is set and the endpoint environment variable is unset
    /// - The endpoint URL is invalid
    /// - The HTTP client cannot be created
    pub fn build(self) -> AzureResult<ServiceClient> {
        let endpoint_str = match self.endpoint {
            Some(endpoint) => endpoint,
            None => self
                .endpoint_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .ok_or_else(|| match &self.endpoint_env {
                    Some(name) => AzureError::MissingConfig(format!(
                        "endpoint is required. Set it via builder or {name} env var."
                    )),
                    None => AzureError::MissingConfig("endpoint is required".into()),
                })?,
        };

        let mut endpoint = Url::parse(&endpoint_str)
            .map_err(|e| AzureError::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let (component, version) = self.component.unwrap_or_else(|| {
            (
                env!("CARGO_PKG_NAME").to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )
        });
        let credential = self.credential.map(|c| (c.credential, c.scopes));
        let pipeline = self
            .options
            .build_pipeline(&component, &version, credential)?;

        Ok(ServiceClient {
            endpoint,
            api_version: self.api_version,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{static_credential, MockHttpClient, TEST_TOKEN};
    use serial_test::serial;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT_ENV: &str = "AZURE_TEST_SERVICE_ENDPOINT";

    fn builder() -> ServiceClientBuilder {
        ServiceClient::builder()
            .endpoint("https://test.vault.azure.net")
            .tracing(TracingSettings::disabled())
    }

    #[test]
    #[serial]
    fn builder_requires_endpoint() {
        std::env::remove_var(ENDPOINT_ENV);

        let err = ServiceClient::builder()
            .endpoint_env(ENDPOINT_ENV)
            .build()
            .unwrap_err();

        assert!(matches!(err, AzureError::MissingConfig(_)));
        assert!(err.to_string().contains(ENDPOINT_ENV));
    }

    #[test]
    #[serial]
    fn builder_uses_endpoint_from_env() {
        let original = std::env::var(ENDPOINT_ENV).ok();
        std::env::set_var(ENDPOINT_ENV, "https://env.vault.azure.net");

        let client = ServiceClient::builder()
            .endpoint_env(ENDPOINT_ENV)
            .build()
            .expect("should build");
        assert_eq!(client.endpoint().as_str(), "https://env.vault.azure.net/");

        let client = ServiceClient::builder()
            .endpoint("https://explicit.vault.azure.net")
            .endpoint_env(ENDPOINT_ENV)
            .build()
            .expect("should build");
        assert_eq!(
            client.endpoint().as_str(),
            "https://explicit.vault.azure.net/"
        );

        match original {
            Some(val) => std::env::set_var(ENDPOINT_ENV, val),
            None => std::env::remove_var(ENDPOINT_ENV),
        }
    }

    #[test]
    fn builder_invalid_endpoint_url() {
        let err = ServiceClient::builder()
            .endpoint("not a valid url")
            .build()
            .unwrap_err();
        assert!(matches!(err, AzureError::InvalidEndpoint { .. }));
    }

    #[test]
    fn url_joins_path_and_api_version() {
        let client = builder().api_version("7.5").build().unwrap();

        let url = client.url("secrets/my-secret").unwrap();
        assert_eq!(
            url.as_str(),
            "https://test.vault.azure.net/secrets/my-secret?api-version=7.5"
        );
    }

    #[test]
    fn endpoint_path_is_kept_when_joining() {
        let client = ServiceClient::builder()
            .endpoint("https://test.example.com/tenant")
            .build()
            .unwrap();

        assert_eq!(
            client.url("items").unwrap().as_str(),
            "https://test.example.com/tenant/items"
        );
        assert_eq!(client.api_version(), None);
    }

    #[test]
    fn client_is_cloneable() {
        let client = builder().build().unwrap();
        let cloned = client.clone();
        assert_eq!(client.endpoint(), cloned.endpoint());
    }

    #[test]
    fn options_debug_hides_policies() {
        let options = ClientOptions {
            application_id: Some("app".into()),
            ..ClientOptions::default()
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("app"));
        assert!(debug.contains("per_call_policies: 0"));
    }

    // --- Wiremock integration tests ---

    async fn setup_mock_client(server: &MockServer) -> ServiceClient {
        ServiceClient::builder()
            .endpoint(server.uri())
            .credential(static_credential(), ["https://vault.azure.net/.default"])
            .allow_insecure_http(true)
            .api_version("7.5")
            .retry(RetryOptions::fixed(Duration::from_millis(10), 3))
            .tracing(TracingSettings::disabled())
            .build()
            .expect("should build client")
    }

    #[tokio::test]
    async fn get_request_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test/endpoint"))
            .and(header("Authorization", format!("Bearer {TEST_TOKEN}").as_str()))
            .and(query_param("api-version", "7.5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let response = client.get("test/endpoint").await.expect("should succeed");

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn put_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items/1"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let response = client
            .put("items/1", &serde_json::json!({"value": "x"}))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn error_status_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": "SecretNotFound", "message": "A secret with (name) was not found"}
            })))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err = client.get("missing").await.unwrap_err();

        match err {
            AzureError::ResourceNotFound { code, message } => {
                assert_eq!(code.as_deref(), Some("SecretNotFound"));
                assert!(message.contains("was not found"));
            }
            other => panic!("Expected ResourceNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_retries_on_503() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let server = MockServer::start().await;
        let request_count = Arc::new(AtomicU32::new(0));
        let counter = request_count.clone();

        Mock::given(method("GET"))
            .and(path("/retry-test"))
            .respond_with(move |_req: &wiremock::Request| {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    ResponseTemplate::new(503).set_body_string("Service Unavailable")
                } else {
                    ResponseTemplate::new(200).set_body_string("OK")
                }
            })
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let response = client.get("retry-test").await.expect("should succeed");

        assert_eq!(response.text(), "OK");
        assert_eq!(request_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bearer_token_over_http_is_rejected_by_default() {
        let client = ServiceClient::builder()
            .endpoint("http://localhost:1")
            .credential(static_credential(), ["scope"])
            .tracing(TracingSettings::disabled())
            .transport(Arc::new(MockHttpClient::new().with_status(200)))
            .build()
            .unwrap();

        let err = client.get("anything").await.unwrap_err();
        assert!(matches!(err, AzureError::Credential(_)));
    }

    #[tokio::test]
    async fn read_timeout_surfaces_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("OK")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = ServiceClient::builder()
            .endpoint(server.uri())
            .read_timeout(Duration::from_millis(200))
            .retry(RetryOptions::none())
            .tracing(TracingSettings::disabled())
            .build()
            .unwrap();

        let start = std::time::Instant::now();
        let err = client.get("slow").await.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn error_messages_are_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sensitive-error"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {
                    "code": "Unauthorized",
                    "message": "Invalid token: Bearer eyJ0eXAiOiJKV1QiLCJhbGciOi"
                }
            })))
            .mount(&server)
            .await;

        let client = setup_mock_client(&server).await;
        let err_string = client.get("sensitive-error").await.unwrap_err().to_string();

        assert!(!err_string.contains("eyJ0eXAiOiJKV1Qi"));
        assert!(err_string.contains("[REDACTED]"));
    }
}

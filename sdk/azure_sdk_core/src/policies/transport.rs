use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AzureError, AzureResult};
use crate::http::{Headers, Request, Response};
use crate::pipeline::Policy;

/// Performs the HTTP call for the terminal [`TransportPolicy`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: &Request) -> AzureResult<Response>;
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn execute(&self, request: &Request) -> AzureResult<Response> {
        let mut builder = self.request(request.method().clone(), request.url().clone());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(Response::new(status, headers, body))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AzureError {
    if err.is_timeout() {
        AzureError::Timeout(err.to_string())
    } else {
        AzureError::Request(err)
    }
}

/// The last policy in every pipeline. Sends the request and never calls
/// further.
///
/// A [`CancellationToken`] in the request context aborts the call.
#[derive(Clone)]
pub struct TransportPolicy {
    client: Arc<dyn HttpClient>,
}

impl TransportPolicy {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for TransportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportPolicy")
    }
}

#[async_trait]
impl Policy for TransportPolicy {
    async fn send(&self, request: &mut Request, _next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
        tracing::trace!(method = %request.method(), "dispatching request");
        let request: &Request = request;
        match request.context().get::<CancellationToken>() {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(AzureError::Cancelled),
                    result = self.client.execute(request) => result,
                }
            }
            None => self.client.execute(request).await,
        }
    }
}

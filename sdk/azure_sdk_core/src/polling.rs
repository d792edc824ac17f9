//! Long-running operation polling.
//!
//! A [`Poller`] owns a [`PollingMethod`] and drives it to completion. Two
//! methods are provided:
//!
//! - [`DeleteRecoverPollingMethod`] repeats a status command until the
//!   resource becomes readable. Not-found responses mean "not yet".
//! - [`StatusPollingMethod`] follows an `Operation-Location` status monitor
//!   until it reports a terminal state.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use azure_sdk_core::http::{Headers, Response};
//! use azure_sdk_core::polling::{DeleteRecoverPollingMethod, Poller};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let initial = Response::new(200, Headers::new(), "{}");
//! let method = DeleteRecoverPollingMethod::new(
//!     initial,
//!     || async { Ok::<_, azure_sdk_core::AzureError>("deleted") },
//!     None,
//!     false,
//!     Duration::from_secs(2),
//! );
//! let resource = Poller::new(method).result().await?;
//! assert_eq!(resource, "deleted");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Method, Request, Response};
use crate::pipeline::{cancellable_sleep, Pipeline};
use crate::policies::retry_after;

/// Default delay between polls (2 seconds).
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// A state machine that advances a long-running operation.
///
/// Once [`finished`](Self::finished) returns true, [`run`](Self::run) returns
/// immediately and [`resource`](Self::resource) no longer changes.
#[async_trait]
pub trait PollingMethod<T>: Send {
    /// Poll until the operation finishes.
    async fn run(&mut self) -> AzureResult<()>;

    /// Whether the operation has reached a terminal state.
    fn finished(&self) -> bool;

    /// The best-known resource, available at any time.
    fn resource(&self) -> Option<&T>;

    /// Consume the method, yielding its resource.
    fn into_resource(self: Box<Self>) -> Option<T>;

    /// The response that started the operation.
    fn initial_response(&self) -> &Response;
}

type PollCommand<T> = Box<dyn FnMut() -> BoxFuture<'static, AzureResult<T>> + Send>;

/// Polls a resource that becomes readable once a delete or recover
/// operation completes.
///
/// Each poll invokes `command`:
/// - `Ok(resource)` finishes the operation with that resource.
/// - `404 Not Found` means the operation is still running: sleep and poll again.
/// - `403 Forbidden` finishes the operation without reading the resource,
///   since the caller may lack read permission on it.
/// - Any other error is returned to the caller without further polling.
pub struct DeleteRecoverPollingMethod<T> {
    initial_response: Response,
    command: PollCommand<T>,
    resource: Option<T>,
    finished: bool,
    interval: Duration,
    cancellation: Option<CancellationToken>,
}

impl<T: Send + 'static> DeleteRecoverPollingMethod<T> {
    /// `final_resource` is reported until a poll succeeds. A method created
    /// with `finished` set never invokes `command`.
    pub fn new<F, Fut>(
        initial_response: Response,
        mut command: F,
        final_resource: Option<T>,
        finished: bool,
        interval: Duration,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = AzureResult<T>> + Send + 'static,
    {
        Self {
            initial_response,
            command: Box::new(move || command().boxed()),
            resource: final_resource,
            finished,
            interval,
            cancellation: None,
        }
    }

    /// Abort the poll-interval sleep when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Delay between polls that find the resource missing.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<T> std::fmt::Debug for DeleteRecoverPollingMethod<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteRecoverPollingMethod")
            .field("finished", &self.finished)
            .field("interval", &self.interval)
            .field("has_resource", &self.resource.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + 'static> PollingMethod<T> for DeleteRecoverPollingMethod<T> {
    #[tracing::instrument(name = "azure::polling::delete_recover", skip(self))]
    async fn run(&mut self) -> AzureResult<()> {
        let mut polls = 0u32;
        while !self.finished {
            polls += 1;
            match (self.command)().await {
                Ok(resource) => {
                    tracing::debug!(polls, "operation complete");
                    self.resource = Some(resource);
                    self.finished = true;
                }
                Err(AzureError::ResourceNotFound { .. }) => {
                    tracing::trace!(
                        polls,
                        interval_ms = self.interval.as_millis() as u64,
                        "resource not available yet, waiting"
                    );
                    cancellable_sleep(self.cancellation.as_ref(), self.interval).await?;
                }
                Err(err) if err.status() == Some(403) => {
                    tracing::debug!("no permission to read the resource, treating operation as complete");
                    self.finished = true;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "polling command failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn resource(&self) -> Option<&T> {
        self.resource.as_ref()
    }

    fn into_resource(self: Box<Self>) -> Option<T> {
        self.resource
    }

    fn initial_response(&self) -> &Response {
        &self.initial_response
    }
}

/// State reported by an operation status monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationState {
    /// Parse a status string, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "notstarted" => Some(Self::NotStarted),
            "running" | "inprogress" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// The latest body returned by a status monitor.
#[derive(Debug, Clone)]
pub struct OperationStatus {
    pub state: OperationState,
    pub body: Value,
}

fn parse_status(body: &Value) -> AzureResult<OperationState> {
    let raw = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| AzureError::OperationFailed {
            status: "unknown".into(),
            message: "status monitor response has no status".into(),
        })?;
    OperationState::parse(raw).ok_or_else(|| AzureError::OperationFailed {
        status: raw.to_string(),
        message: "unrecognized operation status".into(),
    })
}

/// Follows the `Operation-Location` (or `Azure-AsyncOperation`) status
/// monitor of an operation through a [`Pipeline`].
///
/// A `Retry-After` header on a status response overrides the interval.
/// Failed and canceled operations finish with
/// [`AzureError::OperationFailed`].
#[derive(Debug)]
pub struct StatusPollingMethod {
    pipeline: Pipeline,
    initial_response: Response,
    status_url: Url,
    interval: Duration,
    max_polls: Option<u32>,
    polls: u32,
    status: Option<OperationStatus>,
    finished: bool,
    cancellation: Option<CancellationToken>,
}

impl StatusPollingMethod {
    /// # Errors
    ///
    /// Returns an error if the initial response names no valid status monitor.
    pub fn new(pipeline: Pipeline, initial_response: Response) -> AzureResult<Self> {
        let location = initial_response
            .headers()
            .get(headers::OPERATION_LOCATION)
            .or_else(|| initial_response.headers().get(headers::AZURE_ASYNC_OPERATION))
            .ok_or_else(|| {
                AzureError::MissingConfig(
                    "initial response has no Operation-Location header".into(),
                )
            })?;
        let status_url = Url::parse(location).map_err(|e| {
            AzureError::invalid_endpoint_with_source("invalid Operation-Location URL", e)
        })?;

        // Some services answer the initial request with a terminal status.
        let status = serde_json::from_slice::<Value>(initial_response.body())
            .ok()
            .and_then(|body| {
                parse_status(&body)
                    .ok()
                    .map(|state| OperationStatus { state, body })
            });
        let finished = status
            .as_ref()
            .is_some_and(|s| s.state == OperationState::Succeeded);

        Ok(Self {
            pipeline,
            initial_response,
            status_url,
            interval: DEFAULT_POLLING_INTERVAL,
            max_polls: None,
            polls: 0,
            status,
            finished,
            cancellation: None,
        })
    }

    /// Delay between status requests when the service sends no `Retry-After`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Give up with [`AzureError::Timeout`] after `max_polls` status requests.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn status_url(&self) -> &Url {
        &self.status_url
    }

    fn failure(status: &OperationStatus) -> AzureError {
        let message = status
            .body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("operation did not succeed");
        AzureError::OperationFailed {
            status: format!("{:?}", status.state),
            message: crate::error::truncate_message(message),
        }
    }
}

#[async_trait]
impl PollingMethod<OperationStatus> for StatusPollingMethod {
    #[tracing::instrument(name = "azure::polling::status", skip(self))]
    async fn run(&mut self) -> AzureResult<()> {
        tracing::trace!(status_url = %self.status_url, "polling operation status");
        while !self.finished {
            if let Some(max) = self.max_polls {
                if self.polls >= max {
                    return Err(AzureError::Timeout(format!(
                        "operation did not complete after {max} polls"
                    )));
                }
            }
            self.polls += 1;

            let mut request = Request::new(Method::GET, self.status_url.clone());
            if let Some(token) = &self.cancellation {
                request.context_mut().insert(token.clone());
            }
            let response = self.pipeline.send(&mut request).await?.into_result()?;
            let body: Value = response.json()?;
            let state = parse_status(&body)?;
            let status = OperationStatus { state, body };

            match state {
                OperationState::Succeeded => {
                    tracing::debug!(polls = self.polls, "operation succeeded");
                    self.finished = true;
                    self.status = Some(status);
                }
                OperationState::Failed | OperationState::Canceled => {
                    tracing::debug!(polls = self.polls, state = ?state, "operation failed");
                    self.finished = true;
                    let err = Self::failure(&status);
                    self.status = Some(status);
                    return Err(err);
                }
                OperationState::NotStarted | OperationState::Running => {
                    let delay = retry_after(response.headers()).unwrap_or(self.interval);
                    tracing::trace!(
                        polls = self.polls,
                        state = ?state,
                        delay_ms = delay.as_millis() as u64,
                        "operation still in progress, waiting"
                    );
                    self.status = Some(status);
                    cancellable_sleep(self.cancellation.as_ref(), delay).await?;
                }
            }
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn resource(&self) -> Option<&OperationStatus> {
        self.status.as_ref()
    }

    fn into_resource(self: Box<Self>) -> Option<OperationStatus> {
        self.status
    }

    fn initial_response(&self) -> &Response {
        &self.initial_response
    }
}

/// A handle to a long-running operation.
pub struct Poller<T> {
    method: Box<dyn PollingMethod<T>>,
}

impl<T: Send + 'static> Poller<T> {
    pub fn new(method: impl PollingMethod<T> + 'static) -> Self {
        Self {
            method: Box::new(method),
        }
    }

    pub fn done(&self) -> bool {
        self.method.finished()
    }

    /// The best-known resource, possibly before the operation finishes.
    pub fn resource(&self) -> Option<&T> {
        self.method.resource()
    }

    pub fn initial_response(&self) -> &Response {
        self.method.initial_response()
    }

    /// Wait for the operation to finish.
    pub async fn wait(&mut self) -> AzureResult<()> {
        self.method.run().await
    }

    /// Wait for the operation to finish and return its resource.
    ///
    /// # Errors
    ///
    /// Returns the polling error, or [`AzureError::OperationFailed`] if the
    /// operation finished without a resource.
    pub async fn result(mut self) -> AzureResult<T> {
        self.wait().await?;
        self.method
            .into_resource()
            .ok_or_else(|| AzureError::OperationFailed {
                status: "Succeeded".into(),
                message: "operation finished without a resource".into(),
            })
    }

    /// Wait for the operation to finish from synchronous code.
    ///
    /// # Errors
    ///
    /// Fails when called from inside an async runtime.
    pub fn wait_blocking(&mut self) -> AzureResult<()> {
        crate::blocking::block_on(self.wait())?
    }
}

impl<T> std::fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("done", &self.method.finished())
            .finish()
    }
}

//! Helpers for testing code built on the pipeline.
//!
//! Available in this crate's own tests and to other crates through the
//! `test-support` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::credentials::{AccessToken, StaticTokenCredential};
use crate::error::{AzureError, AzureResult};
use crate::http::{Headers, Method, Request, Response};
use crate::policies::HttpClient;

/// Token returned by [`static_credential`] (not a real token).
pub const TEST_TOKEN: &str = "test-access-token";

/// A credential that always returns [`TEST_TOKEN`], valid for one hour.
pub fn static_credential() -> Arc<StaticTokenCredential> {
    Arc::new(StaticTokenCredential::new(AccessToken::new(
        TEST_TOKEN,
        SystemTime::now() + Duration::from_secs(3600),
    )))
}

/// A snapshot of a request seen by [`MockHttpClient`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

#[derive(Clone)]
enum MockReply {
    Response(Response),
    Error(Arc<dyn Fn() -> AzureError + Send + Sync>),
}

/// An [`HttpClient`] that replays queued replies and records every request.
///
/// Replies are used in order; the last one is repeated once the queue is
/// down to a single entry.
#[derive(Default)]
pub struct MockHttpClient {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, status: u16) -> Self {
        self.with_response(Response::new(status, Headers::new(), Bytes::new()))
    }

    pub fn with_json(self, status: u16, body: serde_json::Value) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type", "application/json");
        self.with_response(Response::new(status, headers, body.to_string()))
    }

    pub fn with_response(self, response: Response) -> Self {
        self.push(MockReply::Response(response));
        self
    }

    pub fn with_error(self, make: impl Fn() -> AzureError + Send + Sync + 'static) -> Self {
        self.push(MockReply::Error(Arc::new(make)));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    fn next_reply(&self) -> Option<MockReply> {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &Request) -> AzureResult<Response> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: request.method().clone(),
                url: request.url().clone(),
                headers: request.headers().clone(),
                body: request.body().cloned(),
            });

        match self.next_reply() {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Error(make)) => Err(make()),
            None => Err(AzureError::MissingConfig(
                "MockHttpClient has no replies queued".into(),
            )),
        }
    }
}

//! Request and response types that flow through the [`Pipeline`](crate::pipeline::Pipeline).
//!
//! A [`Request`] carries its method, URL, headers, a resendable body, and a
//! typed [`Context`] that policies use to pass per-call state to each other.
//! A [`Response`] is produced by the transport with a fully buffered body and
//! is not modified afterwards.

use bytes::Bytes;
use url::Url;

use crate::context::Context;
use crate::error::{AzureError, AzureResult};

pub use reqwest::Method;

/// Header names used by the built-in policies.
pub mod headers {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const USER_AGENT: &str = "User-Agent";
    pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
    pub const REQUEST_ID: &str = "x-ms-request-id";
    pub const RETRY_AFTER: &str = "Retry-After";
    pub const RETRY_AFTER_MS: &str = "retry-after-ms";
    pub const X_MS_RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
    pub const OPERATION_LOCATION: &str = "Operation-Location";
    pub const AZURE_ASYNC_OPERATION: &str = "Azure-AsyncOperation";
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
    pub const TRACEPARENT: &str = "traceparent";
    pub const TRACESTATE: &str = "tracestate";
}

/// An ordered collection of headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value with the same name.
    ///
    /// A replaced header keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Set a header only if it is not already present.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.position(&name).is_none() {
            self.entries.push((name, value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// An outgoing HTTP request.
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Option<Bytes>,
    context: Context,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
            context: Context::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    /// Serialize `body` as JSON and set the matching content type.
    pub fn set_json<T: serde::Serialize + ?Sized>(&mut self, body: &T) -> AzureResult<()> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(headers::CONTENT_TYPE, "application/json");
        self.body = Some(Bytes::from(bytes));
        Ok(())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Builder-style helper to set a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder-style helper to add a value to the request context.
    pub fn with_context<T: std::any::Any + Send + Sync>(mut self, value: T) -> Self {
        self.context.insert(value);
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("context", &self.context)
            .finish()
    }
}

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> AzureResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Return the response if it is successful, or the typed error its status
    /// and body describe.
    pub fn into_result(self) -> AzureResult<Response> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AzureError::from_response_body(self.status, &self.text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut headers: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        headers.insert("A", "3");

        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn insert_if_absent_keeps_existing_value() {
        let mut headers = Headers::new();
        headers.insert("x-ms-client-request-id", "caller");
        headers.insert_if_absent("X-MS-CLIENT-REQUEST-ID", "generated");

        assert_eq!(headers.get("x-ms-client-request-id"), Some("caller"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn set_json_sets_content_type() {
        let mut request = Request::new(Method::PUT, Url::parse("https://example.com").unwrap());
        request
            .set_json(&serde_json::json!({"value": "s3cret"}))
            .unwrap();

        assert_eq!(
            request.headers().get("content-type"),
            Some("application/json")
        );
        assert_eq!(request.body().unwrap().as_ref(), br#"{"value":"s3cret"}"#);
    }

    #[test]
    fn into_result_maps_error_statuses() {
        let response = Response::new(404, Headers::new(), "missing");
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, AzureError::ResourceNotFound { .. }));

        let ok = Response::new(204, Headers::new(), Bytes::new());
        assert!(ok.into_result().is_ok());
    }
}

//! Span abstractions used by the
//! [`DistributedTracingPolicy`](crate::policies::DistributedTracingPolicy).
//!
//! Tracing is configured once, through an explicit [`TracingSettings`] value
//! handed to the pipeline. Spans come from one of two implementations:
//!
//! - [`TracingImplementation::Native`] creates `tracing` spans named
//!   `http.request` with OpenTelemetry-style field names, and propagates
//!   W3C trace context through a [`TraceContext`] stored on the request.
//! - [`TracingImplementation::Plugin`] delegates to a caller-supplied
//!   [`SpanFactory`], e.g. an OpenTelemetry bridge.
//!
//! # Examples
//!
//! ```rust
//! use azure_sdk_core::instrumentation::{InstrumentationConfig, TracingSettings};
//!
//! let settings = TracingSettings::native(InstrumentationConfig {
//!     namespace: Some("Microsoft.KeyVault".into()),
//!     ..InstrumentationConfig::default()
//! });
//! assert!(settings.enabled());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Request};

/// Environment variable that enables tracing in [`TracingSettings::from_env`].
pub const TRACING_ENABLED_ENV: &str = "AZURE_TRACING_ENABLED";

/// Span attribute keys.
pub mod attributes {
    pub const RESEND_COUNT: &str = "http.request.resend_count";
    pub const USER_AGENT: &str = "user_agent.original";
    pub const HTTP_METHOD: &str = "http.request.method";
    pub const URL: &str = "url.full";
    pub const STATUS_CODE: &str = "http.response.status_code";
    pub const SERVER_ADDRESS: &str = "server.address";
    pub const SERVER_PORT: &str = "server.port";
    pub const ERROR_TYPE: &str = "error.type";
    pub const CLIENT_REQUEST_ID: &str = "az.client_request_id";
    pub const SERVICE_REQUEST_ID: &str = "az.service_request_id";
    pub const NAMESPACE: &str = "az.namespace";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    Internal,
    #[default]
    Client,
    Server,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Client => "client",
            Self::Server => "server",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// A started span. Ending it consumes it, so a span is closed at most once.
pub trait HttpSpan: Send + Sync {
    fn name(&self) -> &str;

    fn set_attribute(&mut self, key: &str, value: AttributeValue);

    /// Headers that propagate this span's context to the service.
    fn trace_context_headers(&self) -> Vec<(String, String)>;

    fn end(self: Box<Self>, error: Option<&AzureError>);
}

/// Starts spans for a tracing backend supplied by the caller.
pub trait SpanFactory: Send + Sync {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
        parent: Option<&TraceContext>,
    ) -> AzureResult<Box<dyn HttpSpan>>;
}

/// Describes the library emitting spans.
#[derive(Debug, Clone)]
pub struct InstrumentationConfig {
    pub library_name: String,
    pub library_version: Option<String>,
    pub schema_url: Option<String>,
    /// Resource provider namespace, recorded as `az.namespace`.
    pub namespace: Option<String>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            library_name: env!("CARGO_PKG_NAME").to_string(),
            library_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            schema_url: None,
            namespace: None,
        }
    }
}

#[derive(Clone)]
pub enum TracingImplementation {
    Native(InstrumentationConfig),
    Plugin(Arc<dyn SpanFactory>),
}

impl fmt::Debug for TracingImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(config) => f.debug_tuple("Native").field(config).finish(),
            Self::Plugin(_) => f.write_str("Plugin"),
        }
    }
}

/// Whether HTTP spans are created, and by which implementation.
#[derive(Debug, Clone)]
pub struct TracingSettings {
    enabled: bool,
    implementation: TracingImplementation,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TracingSettings {
    /// Spans are only created for calls that opt in through
    /// [`TracingOptions::enabled`].
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            implementation: TracingImplementation::Native(InstrumentationConfig::default()),
        }
    }

    pub fn native(config: InstrumentationConfig) -> Self {
        Self {
            enabled: true,
            implementation: TracingImplementation::Native(config),
        }
    }

    pub fn plugin(factory: Arc<dyn SpanFactory>) -> Self {
        Self {
            enabled: true,
            implementation: TracingImplementation::Plugin(factory),
        }
    }

    /// Native tracing, enabled when [`TRACING_ENABLED_ENV`] is `true` or `1`.
    pub fn from_env() -> Self {
        let enabled = std::env::var(TRACING_ENABLED_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);
        Self::default().with_enabled(enabled)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn implementation(&self) -> &TracingImplementation {
        &self.implementation
    }

    /// Start a span with the configured implementation.
    pub fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
        parent: Option<&TraceContext>,
    ) -> AzureResult<Box<dyn HttpSpan>> {
        match &self.implementation {
            TracingImplementation::Native(config) => Ok(Box::new(NativeSpan::start(
                config, name, kind, attributes, parent,
            ))),
            TracingImplementation::Plugin(factory) => {
                factory.start_span(name, kind, attributes, parent)
            }
        }
    }
}

/// W3C trace context for a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub flags: u8,
    pub trace_state: Option<String>,
}

impl TraceContext {
    /// A sampled context with a new trace id.
    pub fn new_root() -> Self {
        Self {
            trace_id: fastrand::u128(1..),
            span_id: fastrand::u64(1..),
            flags: 0x01,
            trace_state: None,
        }
    }

    /// A new span id within the same trace.
    pub fn child(&self) -> Self {
        Self {
            span_id: fastrand::u64(1..),
            ..self.clone()
        }
    }

    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }

    /// Parse a version `00` `traceparent` header. All-zero ids are invalid.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some()
            || version != "00"
            || trace_id.len() != 32
            || span_id.len() != 16
            || flags.len() != 2
        {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok().filter(|id| *id != 0)?;
        let span_id = u64::from_str_radix(span_id, 16).ok().filter(|id| *id != 0)?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id,
            span_id,
            flags,
            trace_state: None,
        })
    }

    pub fn with_trace_state(mut self, state: impl Into<String>) -> Self {
        self.trace_state = Some(state.into());
        self
    }
}

/// Per-call tracing options, read from the request context.
#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    /// `Some(false)` suppresses the span for this call and `Some(true)` forces
    /// one even when tracing is disabled in [`TracingSettings`].
    pub enabled: Option<bool>,
    /// Added to the span, overriding policy-level attributes with the same key.
    pub attributes: Attributes,
}

/// Computes a span name from the outgoing request.
#[derive(Clone)]
pub struct SpanNamer(Arc<dyn Fn(&Request) -> String + Send + Sync>);

impl SpanNamer {
    pub fn new(f: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn name(&self, request: &Request) -> String {
        (self.0)(request)
    }
}

impl fmt::Debug for SpanNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpanNamer")
    }
}

/// A span backed by the `tracing` crate.
///
/// Well-known attributes are recorded as span fields; all attributes are also
/// kept on the value and logged when the span ends.
pub struct NativeSpan {
    name: String,
    span: tracing::Span,
    context: TraceContext,
    attributes: Attributes,
}

impl NativeSpan {
    fn start(
        config: &InstrumentationConfig,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
        parent: Option<&TraceContext>,
    ) -> Self {
        let context = parent.map_or_else(TraceContext::new_root, TraceContext::child);
        let trace_id = format!("{:032x}", context.trace_id);
        let span_id = format!("{:016x}", context.span_id);
        let span = tracing::info_span!(
            "http.request",
            otel.name = %name,
            otel.kind = kind.as_str(),
            trace_id = %trace_id,
            span_id = %span_id,
            library = %config.library_name,
            http.request.method = tracing::field::Empty,
            url.full = tracing::field::Empty,
            server.address = tracing::field::Empty,
            server.port = tracing::field::Empty,
            http.response.status_code = tracing::field::Empty,
            http.request.resend_count = tracing::field::Empty,
            "error.type" = tracing::field::Empty,
            az.client_request_id = tracing::field::Empty,
            az.service_request_id = tracing::field::Empty,
            az.namespace = tracing::field::Empty,
        );

        let mut native = Self {
            name: name.to_string(),
            span,
            context,
            attributes: Attributes::new(),
        };
        if let Some(namespace) = &config.namespace {
            native.set_attribute(attributes::NAMESPACE, namespace.as_str().into());
        }
        for (key, value) in attributes {
            native.set_attribute(key, value.clone());
        }
        native
    }

    pub fn trace_context(&self) -> &TraceContext {
        &self.context
    }
}

impl HttpSpan for NativeSpan {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        match &value {
            AttributeValue::String(s) => self.span.record(key, s.as_str()),
            AttributeValue::Int(i) => self.span.record(key, *i),
            AttributeValue::Bool(b) => self.span.record(key, *b),
            AttributeValue::Float(x) => self.span.record(key, *x),
        };
        self.attributes.insert(key.to_string(), value);
    }

    fn trace_context_headers(&self) -> Vec<(String, String)> {
        let mut out = vec![(
            headers::TRACEPARENT.to_string(),
            self.context.to_traceparent(),
        )];
        if let Some(state) = &self.context.trace_state {
            out.push((headers::TRACESTATE.to_string(), state.clone()));
        }
        out
    }

    fn end(self: Box<Self>, error: Option<&AzureError>) {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match error {
            Some(err) => tracing::debug!(
                parent: &self.span,
                error = %err,
                attributes = %attributes,
                "http span ended with error"
            ),
            None => tracing::debug!(
                parent: &self.span,
                attributes = %attributes,
                "http span ended"
            ),
        }
    }
}

use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Request, Response};
use crate::instrumentation::{
    attributes, Attributes, AttributeValue, HttpSpan, SpanKind, SpanNamer, TraceContext,
    TracingOptions, TracingSettings,
};
use crate::pipeline::SansIoPolicy;
use crate::policies::RetryCount;

/// The span opened for the current attempt, held in the request context
/// until the attempt completes.
pub struct ActiveSpan(pub Box<dyn HttpSpan>);

/// Opens one client span per attempt and closes it with the outcome.
///
/// A span is started in `on_request` unless tracing is off for the call, and
/// is removed from the request context and ended exactly once by whichever
/// of `on_response` or `on_exception` runs.
#[derive(Debug, Clone, Default)]
pub struct DistributedTracingPolicy {
    settings: TracingSettings,
    namer: Option<SpanNamer>,
    attributes: Attributes,
}

impl DistributedTracingPolicy {
    pub fn new(settings: TracingSettings) -> Self {
        Self {
            settings,
            namer: None,
            attributes: Attributes::new(),
        }
    }

    /// Name spans with `namer` unless the request carries its own [`SpanNamer`].
    pub fn with_namer(mut self, namer: SpanNamer) -> Self {
        self.namer = Some(namer);
        self
    }

    /// Attributes added to every span.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn span_name(&self, request: &Request) -> String {
        if let Some(namer) = request.context().get::<SpanNamer>() {
            return namer.name(request);
        }
        match &self.namer {
            Some(namer) => namer.name(request),
            None => request.method().as_str().to_string(),
        }
    }

    fn set_request_attributes(span: &mut dyn HttpSpan, request: &Request) {
        let url = request.url();
        span.set_attribute(attributes::HTTP_METHOD, request.method().as_str().into());
        span.set_attribute(attributes::URL, url.as_str().into());
        if let Some(host) = url.host_str() {
            span.set_attribute(attributes::SERVER_ADDRESS, host.into());
        }
        if let Some(port) = url.port() {
            span.set_attribute(attributes::SERVER_PORT, port.into());
        }
        if let Some(user_agent) = request.headers().get(headers::USER_AGENT) {
            span.set_attribute(attributes::USER_AGENT, user_agent.into());
        }
        if let Some(RetryCount(count)) = request.context().get::<RetryCount>() {
            if *count > 0 {
                span.set_attribute(attributes::RESEND_COUNT, (*count).into());
            }
        }
        if let Some(id) = request.headers().get(headers::CLIENT_REQUEST_ID) {
            span.set_attribute(attributes::CLIENT_REQUEST_ID, id.into());
        }
    }
}

impl SansIoPolicy for DistributedTracingPolicy {
    fn on_request(&self, request: &mut Request) -> AzureResult<()> {
        let options = request.context().get::<TracingOptions>();
        match options.and_then(|o| o.enabled) {
            Some(false) => return Ok(()),
            None if !self.settings.enabled() => return Ok(()),
            _ => {}
        }

        let mut span_attributes = self.attributes.clone();
        if let Some(options) = options {
            span_attributes.extend(
                options
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        let name = self.span_name(request);
        let parent = request.context().get::<TraceContext>();

        match self
            .settings
            .start_span(&name, SpanKind::Client, &span_attributes, parent)
        {
            Ok(span) => {
                for (header, value) in span.trace_context_headers() {
                    request.headers_mut().insert(header, value);
                }
                request.context_mut().insert(ActiveSpan(span));
            }
            Err(err) => {
                tracing::warn!(error = %err, span = %name, "unable to start HTTP span");
            }
        }
        Ok(())
    }

    fn on_response(&self, request: &mut Request, response: &Response) {
        let Some(ActiveSpan(mut span)) = request.context_mut().remove::<ActiveSpan>() else {
            return;
        };

        Self::set_request_attributes(span.as_mut(), request);
        let status = response.status();
        span.set_attribute(attributes::STATUS_CODE, status.into());
        if status >= 400 {
            span.set_attribute(attributes::ERROR_TYPE, status.to_string().into());
        }
        if let Some(id) = response.headers().get(headers::REQUEST_ID) {
            span.set_attribute(attributes::SERVICE_REQUEST_ID, id.into());
        }
        span.end(None);
    }

    fn on_exception(&self, request: &mut Request, error: &AzureError) {
        let Some(ActiveSpan(mut span)) = request.context_mut().remove::<ActiveSpan>() else {
            return;
        };

        Self::set_request_attributes(span.as_mut(), request);
        span.set_attribute(
            attributes::ERROR_TYPE,
            AttributeValue::from(error.type_name()),
        );
        span.end(Some(error));
    }
}

use std::time::Duration;

use thiserror::Error;

/// Maximum length for error messages to prevent sensitive data leaks.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Errors that can occur when sending requests through the pipeline or
/// interpreting service responses.
#[derive(Error, Debug)]
pub enum AzureError {
    /// The service returned an error status that has no more specific variant.
    #[error("HTTP error: {status} - {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The service returned 404 Not Found.
    #[error("Resource not found: {message}")]
    ResourceNotFound {
        code: Option<String>,
        message: String,
    },

    /// The service returned 409 Conflict.
    #[error("Resource already exists: {message}")]
    ResourceExists {
        code: Option<String>,
        message: String,
    },

    /// The service returned 401 Unauthorized.
    #[error("Authentication failed: {message}")]
    ClientAuthentication {
        code: Option<String>,
        message: String,
    },

    /// A credential could not produce a token.
    #[error("Credential error: {0}")]
    Credential(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The transport gave up waiting for the service.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Local I/O failed (token cache, blocking runtime).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// A request could not be built from the given arguments.
    #[error("Builder error: {0}")]
    Builder(String),

    /// A long-running operation reached a failed terminal state.
    #[error("Operation {status}: {message}")]
    OperationFailed { status: String, message: String },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A span could not be started or finished.
    #[error("Tracing error: {0}")]
    Tracing(String),
}

/// Result type alias for pipeline operations.
pub type AzureResult<T> = std::result::Result<T, AzureError>;

impl AzureError {
    /// Create an error for an HTTP status, choosing the typed variant the
    /// status maps to.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::from_status(status, None, message.into())
    }

    /// Create an [`AzureError::InvalidEndpoint`] that keeps the parse error
    /// as its source.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Map an error status and service error code to a typed error.
    pub fn from_status(status: u16, code: Option<String>, message: String) -> Self {
        match status {
            401 => Self::ClientAuthentication { code, message },
            404 => Self::ResourceNotFound { code, message },
            409 => Self::ResourceExists { code, message },
            _ => Self::Http {
                status,
                code,
                message,
            },
        }
    }

    /// Build an error from a failed response body.
    ///
    /// Bodies shaped like `{"error": {"code": "...", "message": "..."}}` are
    /// unpacked; anything else is kept verbatim. Messages are sanitized and
    /// truncated before being stored.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(err_obj) = value.get("error") {
                let code = err_obj
                    .get("code")
                    .and_then(|c| c.as_str())
                    .map(str::to_string);
                let message = err_obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or(body);
                return Self::from_status(status, code, truncate_message(message));
            }
        }

        Self::from_status(status, None, truncate_message(body))
    }

    /// The HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::ResourceNotFound { .. } => Some(404),
            Self::ResourceExists { .. } => Some(409),
            Self::ClientAuthentication { .. } => Some(401),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The service error code, if the response body carried one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. }
            | Self::ResourceNotFound { code, .. }
            | Self::ResourceExists { code, .. }
            | Self::ClientAuthentication { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the error is a timeout reported by the transport.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Request(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Whether the error is a connection-level transport failure.
    pub fn is_connection_error(&self) -> bool {
        match self {
            // A request that reached the server may have been processed.
            Self::Request(e) => e.is_connect(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        self.is_timeout() || self.is_connection_error()
    }

    /// Fully qualified name of the error variant, used as `error.type` on spans.
    pub fn type_name(&self) -> &'static str {
        macro_rules! qualified {
            ($variant:literal) => {
                concat!(module_path!(), "::AzureError::", $variant)
            };
        }
        match self {
            Self::Http { .. } => qualified!("Http"),
            Self::ResourceNotFound { .. } => qualified!("ResourceNotFound"),
            Self::ResourceExists { .. } => qualified!("ResourceExists"),
            Self::ClientAuthentication { .. } => qualified!("ClientAuthentication"),
            Self::Credential(_) => qualified!("Credential"),
            Self::Serialization(_) => qualified!("Serialization"),
            Self::Request(_) => qualified!("Request"),
            Self::Timeout(_) => qualified!("Timeout"),
            Self::Io(_) => qualified!("Io"),
            Self::InvalidEndpoint { .. } => qualified!("InvalidEndpoint"),
            Self::MissingConfig(_) => qualified!("MissingConfig"),
            Self::Builder(_) => qualified!("Builder"),
            Self::OperationFailed { .. } => qualified!("OperationFailed"),
            Self::Cancelled => qualified!("Cancelled"),
            Self::Tracing(_) => qualified!("Tracing"),
        }
    }

    /// Convenience constructor for transport timeouts.
    pub fn timeout_after(duration: Duration) -> Self {
        Self::Timeout(format!("no response after {duration:?}"))
    }
}

const REDACTED: &str = "[REDACTED]";

fn is_token_delimiter(c: char) -> bool {
    c.is_whitespace() || c == '"' || c == '\'' || c == ','
}

/// Replace every token that follows `marker` with `[REDACTED]`.
///
/// When `keep_marker` is false the marker itself is part of the secret
/// (as with `sk-` keys) and is replaced too.
fn redact_after(input: &str, marker: &str, keep_marker: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(marker) {
        let token_start = pos + marker.len();
        let token_len = rest[token_start..]
            .find(is_token_delimiter)
            .unwrap_or(rest.len() - token_start);

        out.push_str(&rest[..pos]);
        if token_len == 0 || rest[token_start..].starts_with(REDACTED) {
            out.push_str(marker);
            rest = &rest[token_start..];
            continue;
        }
        if keep_marker {
            out.push_str(marker);
        }
        out.push_str(REDACTED);
        rest = &rest[token_start + token_len..];
    }

    out.push_str(rest);
    out
}

/// Sanitize error messages by removing bearer tokens and API keys.
pub fn sanitize_error_message(msg: &str) -> String {
    let without_bearer = redact_after(msg, "Bearer ", true);
    redact_after(&without_bearer, "sk-", false)
}

/// Sanitize a message and cut it down to [`MAX_ERROR_MESSAGE_LEN`] bytes.
pub fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_error_message(msg);

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &sanitized[..cut])
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_typed_variants() {
        assert!(matches!(
            AzureError::http(404, "gone"),
            AzureError::ResourceNotFound { .. }
        ));
        assert!(matches!(
            AzureError::http(409, "exists"),
            AzureError::ResourceExists { .. }
        ));
        assert!(matches!(
            AzureError::http(401, "no"),
            AzureError::ClientAuthentication { .. }
        ));
        assert!(matches!(
            AzureError::http(418, "teapot"),
            AzureError::Http { status: 418, .. }
        ));
    }

    #[test]
    fn response_body_with_error_object_is_unpacked() {
        let body = r#"{"error": {"code": "SecretNotFound", "message": "A secret with (name/id) s was not found"}}"#;
        let err = AzureError::from_response_body(404, body);

        assert_eq!(err.status(), Some(404));
        assert_eq!(err.error_code(), Some("SecretNotFound"));
        assert!(err.to_string().contains("was not found"));
    }

    #[test]
    fn response_body_without_message_falls_back_to_body() {
        let body = r#"{"error": {"code": "SomeError"}}"#;
        let err = AzureError::from_response_body(500, body);

        match err {
            AzureError::Http {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 500);
                assert_eq!(code.as_deref(), Some("SomeError"));
                assert!(message.contains("SomeError"));
            }
            other => panic!("Expected Http error, got {:?}", other),
        }
    }

    #[test]
    fn plain_text_body_is_kept() {
        let err = AzureError::from_response_body(503, "Service Unavailable");
        assert_eq!(err.to_string(), "HTTP error: 503 - Service Unavailable");
    }

    #[test]
    fn type_name_is_fully_qualified() {
        assert_eq!(
            AzureError::Cancelled.type_name(),
            "azure_sdk_core::error::AzureError::Cancelled"
        );
        assert_eq!(
            AzureError::timeout_after(Duration::from_secs(1)).type_name(),
            "azure_sdk_core::error::AzureError::Timeout"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(AzureError::Timeout("slow".into()).is_transient());
        assert!(AzureError::Io(std::io::Error::other("reset")).is_transient());
        assert!(!AzureError::http(500, "boom").is_transient());
        assert!(!AzureError::Cancelled.is_transient());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::get(format!("http://{addr}/")).await.unwrap_err();
        assert!(AzureError::Request(err).is_connection_error());
    }

    #[tokio::test]
    async fn connection_dropped_after_send_is_not_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let err = reqwest::Client::new()
            .post(format!("http://{addr}/secrets/a"))
            .body("payload")
            .send()
            .await
            .unwrap_err();
        assert!(!err.is_connect());
        let err = AzureError::Request(err);
        assert!(!err.is_connection_error());
        assert!(!err.is_transient());
    }

    #[test]
    fn sanitization_removes_bearer_tokens() {
        let msg = "Invalid token: Bearer eyJ0eXAiOiJKV1Qi.payload.sig";
        let result = sanitize_error_message(msg);

        assert!(!result.contains("eyJ0eXAiOiJKV1Qi"));
        assert_eq!(result, "Invalid token: Bearer [REDACTED]");
    }

    #[test]
    fn sanitization_preserves_legitimate_errors() {
        let msg = "A secret with (name/id) my-secret was not found in this key vault.";
        assert_eq!(sanitize_error_message(msg), msg);
    }

    #[test]
    fn sanitization_multiple_tokens() {
        let msg = "Token Bearer abc123 and key sk-xyz789 both invalid";
        let result = sanitize_error_message(msg);

        assert!(!result.contains("abc123"));
        assert!(!result.contains("xyz789"));
        assert_eq!(result.matches(REDACTED).count(), 2);
    }

    #[test]
    fn sanitization_is_idempotent() {
        let once = sanitize_error_message("Bearer abc");
        assert_eq!(sanitize_error_message(&once), once);
    }

    #[test]
    fn sanitization_before_truncation() {
        let token = "sk-verylongtokenthatmightbetrimmed123456789";
        let padding = "x".repeat(950);
        let msg = format!("{} token: {}", padding, token);

        let result = truncate_message(&msg);
        assert!(!result.contains("sk-verylongtokenthatmightbetrimmed"));
    }

    #[test]
    fn long_messages_are_truncated() {
        let msg = "y".repeat(MAX_ERROR_MESSAGE_LEN + 10);
        let result = truncate_message(&msg);
        assert!(result.ends_with("... (truncated)"));
        assert_eq!(result.len(), MAX_ERROR_MESSAGE_LEN + "... (truncated)".len());
    }
}

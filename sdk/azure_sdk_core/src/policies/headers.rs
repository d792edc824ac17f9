use crate::error::AzureResult;
use crate::http::{headers, Headers, Request};
use crate::pipeline::SansIoPolicy;

/// Environment variable whose value is appended to the `User-Agent` header.
pub const USER_AGENT_ENV: &str = "AZURE_HTTP_USER_AGENT";

/// Adds fixed headers to every request that does not already set them.
#[derive(Debug, Clone, Default)]
pub struct HeadersPolicy {
    headers: Headers,
}

impl HeadersPolicy {
    /// A policy adding `headers`.
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }
}

impl SansIoPolicy for HeadersPolicy {
    fn on_request(&self, request: &mut Request) -> AzureResult<()> {
        for (name, value) in self.headers.iter() {
            request.headers_mut().insert_if_absent(name, value);
        }
        Ok(())
    }
}

/// Sets `User-Agent` to
/// `[<application id> ]azsdk-rust-<component>/<version> (<os>; <arch>)`.
///
/// A user agent already on the request is kept after the SDK's value.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    user_agent: String,
}

impl UserAgentPolicy {
    /// `application_id` is prepended when set. `AZURE_HTTP_USER_AGENT` is
    /// appended when present in the environment.
    pub fn new(component: &str, version: &str, application_id: Option<&str>) -> Self {
        let mut user_agent = format!(
            "azsdk-rust-{}/{} ({}; {})",
            component,
            version,
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        if let Some(app) = application_id.filter(|a| !a.is_empty()) {
            user_agent = format!("{app} {user_agent}");
        }
        if let Ok(extra) = std::env::var(USER_AGENT_ENV) {
            if !extra.trim().is_empty() {
                user_agent = format!("{user_agent} {}", extra.trim());
            }
        }
        Self { user_agent }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl SansIoPolicy for UserAgentPolicy {
    fn on_request(&self, request: &mut Request) -> AzureResult<()> {
        let value = match request.headers().get(headers::USER_AGENT) {
            Some(existing) if !existing.contains(&self.user_agent) => {
                format!("{} {}", self.user_agent, existing)
            }
            Some(existing) => existing.to_string(),
            None => self.user_agent.clone(),
        };
        request.headers_mut().insert(headers::USER_AGENT, value);
        Ok(())
    }
}

/// Adds `x-ms-client-request-id` when the caller did not set one.
///
/// The policy runs outside the retry loop, so every attempt of one
/// operation carries the same id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdPolicy;

impl SansIoPolicy for RequestIdPolicy {
    fn on_request(&self, request: &mut Request) -> AzureResult<()> {
        if !request.headers().contains(headers::CLIENT_REQUEST_ID) {
            request
                .headers_mut()
                .insert(headers::CLIENT_REQUEST_ID, new_request_id());
        }
        Ok(())
    }
}

/// A random id formatted as a version 4 UUID.
pub fn new_request_id() -> String {
    let mut bits = fastrand::u128(..);
    bits = (bits & !(0xF << 76)) | (0x4 << 76);
    bits = (bits & !(0x3 << 62)) | (0x2 << 62);
    let hex = format!("{bits:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use serial_test::serial;
    use url::Url;

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://example.com").unwrap())
    }

    #[test]
    fn request_id_has_uuid_v4_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 36);
        let chars: Vec<char> = id.chars().collect();
        for idx in [8, 13, 18, 23] {
            assert_eq!(chars[idx], '-');
        }
        assert_eq!(chars[14], '4');
        assert!(matches!(chars[19], '8' | '9' | 'a' | 'b'));
    }

    #[test]
    fn request_id_is_kept_when_present() {
        let mut req = request().with_header("x-ms-client-request-id", "mine");
        RequestIdPolicy.on_request(&mut req).unwrap();
        assert_eq!(req.headers().get("x-ms-client-request-id"), Some("mine"));

        let mut req = request();
        RequestIdPolicy.on_request(&mut req).unwrap();
        assert!(req.headers().contains("x-ms-client-request-id"));
    }

    #[test]
    fn headers_policy_does_not_override() {
        let mut defaults = Headers::new();
        defaults.insert("Accept", "application/json");
        defaults.insert("x-extra", "1");
        let policy = HeadersPolicy::new(defaults);

        let mut req = request().with_header("accept", "text/plain");
        policy.on_request(&mut req).unwrap();

        assert_eq!(req.headers().get("accept"), Some("text/plain"));
        assert_eq!(req.headers().get("x-extra"), Some("1"));
    }

    #[test]
    #[serial]
    fn user_agent_format() {
        std::env::remove_var(USER_AGENT_ENV);
        let policy = UserAgentPolicy::new("keyvault-secrets", "0.3.0", Some("myapp"));
        let expected_prefix = "myapp azsdk-rust-keyvault-secrets/0.3.0 (";
        assert!(policy.user_agent().starts_with(expected_prefix));
        assert!(policy.user_agent().contains(std::env::consts::OS));
    }

    #[test]
    #[serial]
    fn user_agent_env_suffix() {
        std::env::set_var(USER_AGENT_ENV, "pipeline/ci");
        let policy = UserAgentPolicy::new("core", "1.0.0", None);
        std::env::remove_var(USER_AGENT_ENV);

        assert!(policy.user_agent().ends_with(" pipeline/ci"));
    }

    #[test]
    #[serial]
    fn user_agent_keeps_caller_value() {
        std::env::remove_var(USER_AGENT_ENV);
        let policy = UserAgentPolicy::new("core", "1.0.0", None);
        let mut req = request().with_header("User-Agent", "custom/2.0");

        policy.on_request(&mut req).unwrap();
        policy.on_request(&mut req).unwrap();

        let ua = req.headers().get("user-agent").unwrap();
        assert!(ua.starts_with("azsdk-rust-core/1.0.0"));
        assert!(ua.ends_with("custom/2.0"));
        assert_eq!(ua.matches("azsdk-rust-core").count(), 1);
    }
}

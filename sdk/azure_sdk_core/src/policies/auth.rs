use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::credentials::{AccessToken, TokenCredential};
use crate::error::{AzureError, AzureResult};
use crate::http::{headers, Request, Response};
use crate::pipeline::{send_next, Policy};

/// Cached tokens are refreshed when they expire within this window (5 minutes).
pub const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// Adds `Authorization: Bearer <token>` to every attempt.
///
/// Tokens are cached and shared by all requests going through the policy.
/// A 401 response carrying a `WWW-Authenticate` challenge triggers one
/// resend with a freshly acquired token.
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    allow_http: bool,
    cache: RwLock<Option<AccessToken>>,
}

impl BearerTokenPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self {
            credential,
            scopes,
            allow_http: false,
            cache: RwLock::new(None),
        }
    }

    /// Permit sending tokens over plain `http`. Only for local test servers.
    pub fn allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    async fn token(&self, force_refresh: bool) -> AzureResult<SecretString> {
        if !force_refresh {
            let cached = self.cache.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.expires_within(TOKEN_REFRESH_WINDOW) {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if !token.expires_within(TOKEN_REFRESH_WINDOW) {
                    return Ok(token.token.clone());
                }
            }
        }

        let token = self.credential.get_token(&self.scopes).await?;
        tracing::debug!(
            scopes = ?self.scopes,
            expires_on = token.expires_on_unix(),
            "acquired access token"
        );
        let secret = token.token.clone();
        *cached = Some(token);
        Ok(secret)
    }

    fn authorize(request: &mut Request, token: &SecretString) {
        request.headers_mut().insert(
            headers::AUTHORIZATION,
            format!("Bearer {}", token.expose_secret()),
        );
    }
}

impl std::fmt::Debug for BearerTokenPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenPolicy")
            .field("scopes", &self.scopes)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(&self, request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
        if request.url().scheme() != "https" && !self.allow_http {
            return Err(AzureError::Credential(
                "bearer token authentication requires an https URL".into(),
            ));
        }

        let token = self.token(false).await?;
        Self::authorize(request, &token);
        let response = send_next(request, next).await?;

        if response.status() == 401 && response.headers().contains(headers::WWW_AUTHENTICATE) {
            tracing::debug!("received authentication challenge, refreshing token");
            let token = self.token(true).await?;
            Self::authorize(request, &token);
            return send_next(request, next).await;
        }

        Ok(response)
    }
}

/// Sends a static key in a named header, e.g. `api-key`.
pub struct KeyCredentialPolicy {
    header: String,
    key: SecretString,
}

impl KeyCredentialPolicy {
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: SecretString::from(key.into()),
        }
    }
}

impl std::fmt::Debug for KeyCredentialPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyCredentialPolicy({}: ****)", self.header)
    }
}

#[async_trait]
impl Policy for KeyCredentialPolicy {
    async fn send(&self, request: &mut Request, next: &[Arc<dyn Policy>]) -> AzureResult<Response> {
        request
            .headers_mut()
            .insert(self.header.clone(), self.key.expose_secret());
        send_next(request, next).await
    }
}

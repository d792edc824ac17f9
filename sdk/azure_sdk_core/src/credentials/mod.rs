//! Credentials that produce bearer tokens for the
//! [`BearerTokenPolicy`](crate::policies::BearerTokenPolicy).
//!
//! # Examples
//!
//! ```rust,no_run
//! use azure_sdk_core::credentials::{EnvironmentCredential, TokenCredential};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = EnvironmentCredential::new();
//! let token = credential
//!     .get_token(&["https://vault.azure.net/.default".to_string()])
//!     .await?;
//! println!("expires at {:?}", token.expires_on);
//! # Ok(())
//! # }
//! ```

mod persistent;

pub use persistent::{PersistentTokenCredential, TokenCachePersistenceOptions};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{AzureError, AzureResult};

/// Environment variable holding a pre-acquired access token.
pub const ACCESS_TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

/// Environment variable holding the token's expiry as unix seconds.
pub const ACCESS_TOKEN_EXPIRES_ON_ENV: &str = "AZURE_ACCESS_TOKEN_EXPIRES_ON";

/// Lifetime assumed for environment tokens without an explicit expiry.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// A bearer token and the time it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_on: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: SystemTime) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
        }
    }

    /// Whether the token expires within `window` from now (or already has).
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_on.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining <= window,
            Err(_) => true,
        }
    }

    /// Expiry as unix seconds, saturating at zero for pre-epoch times.
    pub fn expires_on_unix(&self) -> u64 {
        self.expires_on
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"****")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// A source of access tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scopes: &[String]) -> AzureResult<AccessToken>;
}

/// A credential that always returns the same token.
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

impl std::fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticTokenCredential(****)")
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[String]) -> AzureResult<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Reads a token from [`ACCESS_TOKEN_ENV`] on every call.
///
/// The expiry comes from [`ACCESS_TOKEN_EXPIRES_ON_ENV`] when set, otherwise
/// the token is assumed valid for [`DEFAULT_TOKEN_LIFETIME`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCredential;

impl EnvironmentCredential {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    async fn get_token(&self, _scopes: &[String]) -> AzureResult<AccessToken> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AzureError::Credential(format!(
                    "environment credential unavailable. Set {ACCESS_TOKEN_ENV}."
                ))
            })?;

        let expires_on = match std::env::var(ACCESS_TOKEN_EXPIRES_ON_ENV) {
            Ok(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    AzureError::Credential(format!(
                        "{ACCESS_TOKEN_EXPIRES_ON_ENV} must be unix seconds, got {raw:?}"
                    ))
                })?;
                UNIX_EPOCH + Duration::from_secs(secs)
            }
            Err(_) => SystemTime::now() + DEFAULT_TOKEN_LIFETIME,
        };

        tracing::debug!("acquired token from environment");
        Ok(AccessToken::new(token, expires_on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    fn scopes() -> Vec<String> {
        vec!["https://vault.azure.net/.default".to_string()]
    }

    #[test]
    fn access_token_debug_redacts() {
        let token = AccessToken::new("super-secret", SystemTime::now());
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn expires_within_window() {
        let soon = AccessToken::new("t", SystemTime::now() + Duration::from_secs(60));
        assert!(soon.expires_within(Duration::from_secs(300)));

        let later = AccessToken::new("t", SystemTime::now() + Duration::from_secs(3600));
        assert!(!later.expires_within(Duration::from_secs(300)));

        let expired = AccessToken::new("t", SystemTime::now() - Duration::from_secs(1));
        assert!(expired.expires_within(Duration::ZERO));
    }

    #[tokio::test]
    async fn static_credential_returns_token() {
        let credential = StaticTokenCredential::new(AccessToken::new(
            "fixed",
            SystemTime::now() + Duration::from_secs(60),
        ));
        let token = credential.get_token(&scopes()).await.unwrap();
        assert_eq!(token.token.expose_secret(), "fixed");
    }

    #[tokio::test]
    #[serial]
    async fn environment_credential_reads_token_and_expiry() {
        std::env::set_var(ACCESS_TOKEN_ENV, "env-token");
        std::env::set_var(ACCESS_TOKEN_EXPIRES_ON_ENV, "4102444800");

        let token = EnvironmentCredential::new()
            .get_token(&scopes())
            .await
            .unwrap();

        assert_eq!(token.token.expose_secret(), "env-token");
        assert_eq!(token.expires_on_unix(), 4_102_444_800);

        std::env::remove_var(ACCESS_TOKEN_ENV);
        std::env::remove_var(ACCESS_TOKEN_EXPIRES_ON_ENV);
    }

    #[tokio::test]
    #[serial]
    async fn environment_credential_requires_token() {
        std::env::remove_var(ACCESS_TOKEN_ENV);

        let err = EnvironmentCredential::new()
            .get_token(&scopes())
            .await
            .unwrap_err();
        assert!(matches!(err, AzureError::Credential(_)));
    }

    #[tokio::test]
    #[serial]
    async fn environment_credential_rejects_bad_expiry() {
        std::env::set_var(ACCESS_TOKEN_ENV, "env-token");
        std::env::set_var(ACCESS_TOKEN_EXPIRES_ON_ENV, "tomorrow");

        let err = EnvironmentCredential::new()
            .get_token(&scopes())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unix seconds"));

        std::env::remove_var(ACCESS_TOKEN_ENV);
        std::env::remove_var(ACCESS_TOKEN_EXPIRES_ON_ENV);
    }
}

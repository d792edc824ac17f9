//! The Key Vault secrets client.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_sdk_core::credentials::EnvironmentCredential;
//! use azure_sdk_keyvault_secrets::SecretClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SecretClient::builder()
//!     .vault_url("https://my-vault.vault.azure.net")
//!     .credential(Arc::new(EnvironmentCredential::new()))
//!     .build()?;
//!
//! client.set_secret("db-password", "hunter2").await?;
//!
//! // Wait for soft-delete to finish before purging.
//! let mut poller = client.begin_delete_secret("db-password").await?;
//! poller.wait().await?;
//! client.purge_deleted_secret("db-password").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use azure_sdk_core::client::{ClientOptions, ServiceClient};
use azure_sdk_core::credentials::TokenCredential;
use azure_sdk_core::error::{AzureError, AzureResult};
use azure_sdk_core::http::Method;
use azure_sdk_core::instrumentation::TracingSettings;
use azure_sdk_core::policies::{HttpClient, RetryOptions};
use azure_sdk_core::polling::{DeleteRecoverPollingMethod, Poller, DEFAULT_POLLING_INTERVAL};
use url::Url;

use crate::models::{
    DeletedSecret, DeletedSecretBundle, KeyVaultSecret, SecretBundle, SecretOptions,
    SecretProperties, SecretSetParameters, SecretUpdateParameters, API_VERSION, KEY_VAULT_SCOPE,
};

/// Environment variable read for the vault URL when none is set.
pub const VAULT_URL_ENV: &str = "AZURE_KEYVAULT_URL";

/// A client for the secrets in one vault.
///
/// Cheaply cloneable; clones share the pipeline.
#[derive(Debug, Clone)]
pub struct SecretClient {
    client: ServiceClient,
    polling_interval: Duration,
}

impl SecretClient {
    /// Start configuring a client. A credential is required.
    pub fn builder() -> SecretClientBuilder {
        SecretClientBuilder::default()
    }

    /// The vault this client talks to.
    pub fn vault_url(&self) -> &Url {
        self.client.endpoint()
    }

    /// The Key Vault REST API version sent with every request.
    pub fn api_version(&self) -> &str {
        self.client.api_version().unwrap_or(API_VERSION)
    }

    /// Get a secret. Gets the latest version when `version` is `None`.
    ///
    /// # Errors
    ///
    /// [`AzureError::ResourceNotFound`] if the secret does not exist.
    #[tracing::instrument(name = "keyvault::secrets::get_secret", skip(self))]
    pub async fn get_secret(&self, name: &str, version: Option<&str>) -> AzureResult<KeyVaultSecret> {
        let path = secret_path(name, version)?;
        let bundle: SecretBundle = self.client.get(&path).await?.json()?;
        Ok(KeyVaultSecret::from_bundle(bundle))
    }

    /// Set a secret's value, creating a new version if the name is in use.
    pub async fn set_secret(&self, name: &str, value: &str) -> AzureResult<KeyVaultSecret> {
        self.set_secret_with_options(name, value, &SecretOptions::default())
            .await
    }

    #[tracing::instrument(name = "keyvault::secrets::set_secret", skip(self, value, options))]
    pub async fn set_secret_with_options(
        &self,
        name: &str,
        value: &str,
        options: &SecretOptions,
    ) -> AzureResult<KeyVaultSecret> {
        let path = secret_path(name, None)?;
        let parameters = SecretSetParameters {
            value,
            tags: options.tags.as_ref(),
            content_type: options.content_type.as_deref(),
            attributes: options.attributes(),
        };
        let bundle: SecretBundle = self.client.put(&path, &parameters).await?.json()?;
        Ok(KeyVaultSecret::from_bundle(bundle))
    }

    /// Update a secret's properties other than its value. Updates the
    /// latest version when `version` is `None`.
    #[tracing::instrument(name = "keyvault::secrets::update_secret_properties", skip(self, options))]
    pub async fn update_secret_properties(
        &self,
        name: &str,
        version: Option<&str>,
        options: &SecretOptions,
    ) -> AzureResult<SecretProperties> {
        let path = secret_path(name, version)?;
        let parameters = SecretUpdateParameters {
            tags: options.tags.as_ref(),
            content_type: options.content_type.as_deref(),
            attributes: options.attributes(),
        };
        let mut request = self.client.request(Method::PATCH, &path)?;
        request.set_json(&parameters)?;
        let bundle: SecretBundle = self.client.send(&mut request).await?.json()?;
        Ok(SecretProperties::from_bundle(&bundle))
    }

    /// Get a deleted secret. Only possible in vaults with soft-delete enabled.
    #[tracing::instrument(name = "keyvault::secrets::get_deleted_secret", skip(self))]
    pub async fn get_deleted_secret(&self, name: &str) -> AzureResult<DeletedSecret> {
        validate_name("secret name", name)?;
        let bundle: DeletedSecretBundle = self
            .client
            .get(&format!("deletedsecrets/{name}"))
            .await?
            .json()?;
        Ok(DeletedSecret::from_bundle(bundle))
    }

    /// Permanently delete a deleted secret.
    #[tracing::instrument(name = "keyvault::secrets::purge_deleted_secret", skip(self))]
    pub async fn purge_deleted_secret(&self, name: &str) -> AzureResult<()> {
        validate_name("secret name", name)?;
        self.client.delete(&format!("deletedsecrets/{name}")).await?;
        Ok(())
    }

    /// Delete every version of a secret.
    ///
    /// Deletion can take several seconds in a vault with soft-delete
    /// enabled; wait on the returned poller before purging. Without
    /// soft-delete the response carries no recovery id and the poller starts
    /// out finished.
    #[tracing::instrument(name = "keyvault::secrets::begin_delete_secret", skip(self))]
    pub async fn begin_delete_secret(&self, name: &str) -> AzureResult<Poller<DeletedSecret>> {
        let path = secret_path(name, None)?;
        let response = self.client.delete(&path).await?;
        let deleted = DeletedSecret::from_bundle(response.json()?);
        let finished = deleted.recovery_id.is_none();
        if finished {
            tracing::debug!("soft-delete disabled, delete is already complete");
        }

        let client = self.clone();
        let name = name.to_string();
        let command = move || {
            let client = client.clone();
            let name = name.clone();
            async move { client.get_deleted_secret(&name).await }
        };

        let method = DeleteRecoverPollingMethod::new(
            response,
            command,
            Some(deleted),
            finished,
            self.polling_interval,
        );
        Ok(Poller::new(method))
    }

    /// Recover a deleted secret to its latest version.
    ///
    /// The poller finishes once the recovered secret can be read.
    #[tracing::instrument(name = "keyvault::secrets::begin_recover_deleted_secret", skip(self))]
    pub async fn begin_recover_deleted_secret(
        &self,
        name: &str,
    ) -> AzureResult<Poller<SecretProperties>> {
        validate_name("secret name", name)?;
        let mut request = self
            .client
            .request(Method::POST, &format!("deletedsecrets/{name}/recover"))?;
        let response = self.client.send(&mut request).await?;
        let bundle: SecretBundle = response.json()?;
        let recovered = SecretProperties::from_bundle(&bundle);

        let client = self.clone();
        let name = name.to_string();
        let command = move || {
            let client = client.clone();
            let name = name.clone();
            async move {
                let secret = client.get_secret(&name, None).await?;
                Ok(secret.properties)
            }
        };

        let method = DeleteRecoverPollingMethod::new(
            response,
            command,
            Some(recovered),
            false,
            self.polling_interval,
        );
        Ok(Poller::new(method))
    }
}

fn validate_name(kind: &str, value: &str) -> AzureResult<()> {
    if value.trim().is_empty() {
        return Err(AzureError::Builder(format!("{kind} cannot be empty")));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(AzureError::Builder(format!(
            "{kind} may only contain letters, digits and dashes: {value:?}"
        )));
    }
    Ok(())
}

fn secret_path(name: &str, version: Option<&str>) -> AzureResult<String> {
    validate_name("secret name", name)?;
    match version.filter(|v| !v.is_empty()) {
        Some(version) => {
            validate_name("secret version", version)?;
            Ok(format!("secrets/{name}/{version}"))
        }
        None => Ok(format!("secrets/{name}")),
    }
}

/// Builder for a [`SecretClient`].
#[derive(Default)]
pub struct SecretClientBuilder {
    vault_url: Option<String>,
    credential: Option<Arc<dyn TokenCredential>>,
    api_version: Option<String>,
    polling_interval: Option<Duration>,
    options: ClientOptions,
}

impl std::fmt::Debug for SecretClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretClientBuilder")
            .field("vault_url", &self.vault_url)
            .field("credential", &self.credential.is_some())
            .field("api_version", &self.api_version)
            .field("polling_interval", &self.polling_interval)
            .field("options", &self.options)
            .finish()
    }
}

impl SecretClientBuilder {
    /// The vault URL, such as `https://my-vault.vault.azure.net`. Falls back
    /// to `AZURE_KEYVAULT_URL`.
    pub fn vault_url(mut self, url: impl Into<String>) -> Self {
        self.vault_url = Some(url.into());
        self
    }

    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Delay between polls of delete and recover operations (default 2s).
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn tracing(mut self, settings: TracingSettings) -> Self {
        self.options.tracing = Some(settings);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.options.transport = Some(transport);
        self
    }

    /// Allow plain `http` vault URLs. Only meant for local test servers.
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.options.allow_insecure_http = allow;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No credential is set
    /// - No vault URL is set and `AZURE_KEYVAULT_URL` is unset
    /// - The vault URL is invalid
    pub fn build(self) -> AzureResult<SecretClient> {
        let credential = self
            .credential
            .ok_or_else(|| AzureError::MissingConfig("credential is required".into()))?;

        let mut builder = ServiceClient::builder()
            .options(self.options)
            .endpoint_env(VAULT_URL_ENV)
            .credential(credential, [KEY_VAULT_SCOPE])
            .api_version(self.api_version.unwrap_or_else(|| API_VERSION.to_string()))
            .component(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        if let Some(url) = self.vault_url {
            builder = builder.endpoint(url);
        }

        Ok(SecretClient {
            client: builder.build()?,
            polling_interval: self.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL),
        })
    }
}

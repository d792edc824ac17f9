//! # Azure Key Vault secrets
//!
//! A client for reading and managing secrets in an Azure Key Vault, built
//! on the `azure_sdk_core` pipeline.
//!
//! Deleting and recovering secrets are long-running in vaults with
//! soft-delete enabled, so [`SecretClient::begin_delete_secret`] and
//! [`SecretClient::begin_recover_deleted_secret`] return a
//! [`Poller`](azure_sdk_core::polling::Poller).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_sdk_core::credentials::EnvironmentCredential;
//! use azure_sdk_keyvault_secrets::SecretClient;
//! use secrecy::ExposeSecret;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SecretClient::builder()
//!     .credential(Arc::new(EnvironmentCredential::new()))
//!     .build()?; // vault URL from AZURE_KEYVAULT_URL
//!
//! let secret = client.get_secret("db-password", None).await?;
//! if let Some(value) = &secret.value {
//!     println!("{} has {} characters", secret.name().unwrap_or_default(), value.expose_secret().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod models;

pub use client::{SecretClient, SecretClientBuilder};
pub use models::{DeletedSecret, KeyVaultSecret, SecretOptions, SecretProperties};

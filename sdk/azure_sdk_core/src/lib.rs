//! # Azure SDK core
//!
//! The HTTP pipeline and shared machinery behind Azure service clients.
//!
//! - [`pipeline`]: the [`Policy`](pipeline::Policy) chain every request runs
//!   through, and a builder that assembles the standard policies.
//! - [`policies`]: retry, bearer-token auth, distributed tracing, logging,
//!   request headers and the reqwest transport.
//! - [`credentials`]: token credentials and the persistent token cache.
//! - [`polling`]: pollers for long-running operations.
//! - [`blocking`]: synchronous wrappers over the async API.
//! - [`client`]: a generic endpoint client used by the service crates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_sdk_core::credentials::EnvironmentCredential;
//! use azure_sdk_core::http::{Method, Request};
//! use azure_sdk_core::pipeline::Pipeline;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::builder()
//!         .component("my-service", "1.0.0")
//!         .credential(Arc::new(EnvironmentCredential::new()), ["https://vault.azure.net/.default"])
//!         .build()?;
//!
//!     let mut request = Request::new(
//!         Method::GET,
//!         Url::parse("https://my-vault.vault.azure.net/secrets/name?api-version=7.5")?,
//!     );
//!     let response = pipeline.send(&mut request).await?.into_result()?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod blocking;
pub mod client;
pub mod context;
pub mod credentials;
pub mod error;
pub mod http;
pub mod instrumentation;
pub mod pipeline;
pub mod policies;
pub mod polling;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use context::Context;
pub use error::{AzureError, AzureResult};
pub use pipeline::{Pipeline, Policy, SansIoPolicy};
pub use polling::{DeleteRecoverPollingMethod, Poller, PollingMethod};

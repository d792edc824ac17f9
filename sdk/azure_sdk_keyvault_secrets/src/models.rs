//! Secret models and their Key Vault wire formats.
//!
//! Timestamps are Unix seconds, as Key Vault sends them.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

/// Key Vault API version used by [`SecretClient`](crate::SecretClient).
pub const API_VERSION: &str = "7.5";

/// Token scope for Key Vault.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// The parts of a Key Vault object identifier such as
/// `https://my-vault.vault.azure.net/secrets/name/version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVaultResourceId {
    pub source_id: String,
    pub vault_url: String,
    pub name: String,
    pub version: Option<String>,
}

impl KeyVaultResourceId {
    /// Parse an identifier. Returns `None` for anything that is not
    /// `<vault>/<collection>/<name>[/<version>]`.
    pub fn parse(id: &str) -> Option<Self> {
        let url = Url::parse(id).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let (name, version) = match segments.as_slice() {
            [_collection, name] => (*name, None),
            [_collection, name, version] => (*name, Some(version.to_string())),
            _ => return None,
        };
        let vault_url = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), url.host_str()?, port),
            None => format!("{}://{}", url.scheme(), url.host_str()?),
        };
        Some(Self {
            source_id: id.to_string(),
            vault_url,
            name: name.to_string(),
            version,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SecretAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<u64>,
    #[serde(rename = "exp", skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    #[serde(skip_serializing)]
    pub created: Option<u64>,
    #[serde(skip_serializing)]
    pub updated: Option<u64>,
    #[serde(skip_serializing)]
    pub recovery_level: Option<String>,
    #[serde(skip_serializing)]
    pub recoverable_days: Option<i32>,
}

impl SecretAttributes {
    fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.not_before.is_none() && self.expires.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SecretBundle {
    pub value: Option<String>,
    pub id: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub attributes: SecretAttributes,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub kid: Option<String>,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeletedSecretBundle {
    #[serde(flatten)]
    pub secret: SecretBundle,
    pub recovery_id: Option<String>,
    pub scheduled_purge_date: Option<u64>,
    pub deleted_date: Option<u64>,
}

/// Body of a set-secret request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SecretSetParameters<'a> {
    pub value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<SecretAttributes>,
}

/// Body of an update-properties request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SecretUpdateParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<SecretAttributes>,
}

/// Optional settings for setting a secret or updating its properties.
#[derive(Debug, Clone, Default)]
pub struct SecretOptions {
    pub enabled: Option<bool>,
    pub content_type: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub not_before: Option<u64>,
    pub expires_on: Option<u64>,
}

impl SecretOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// An arbitrary label for the secret's type, such as `password`.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn not_before(mut self, unix_seconds: u64) -> Self {
        self.not_before = Some(unix_seconds);
        self
    }

    pub fn expires_on(mut self, unix_seconds: u64) -> Self {
        self.expires_on = Some(unix_seconds);
        self
    }

    pub(crate) fn attributes(&self) -> Option<SecretAttributes> {
        let attributes = SecretAttributes {
            enabled: self.enabled,
            not_before: self.not_before,
            expires: self.expires_on,
            ..SecretAttributes::default()
        };
        (!attributes.is_empty()).then_some(attributes)
    }
}

/// A secret's metadata without its value.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretProperties {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub vault_url: Option<String>,
    pub content_type: Option<String>,
    pub enabled: Option<bool>,
    pub not_before: Option<u64>,
    pub expires_on: Option<u64>,
    pub created_on: Option<u64>,
    pub updated_on: Option<u64>,
    /// Such as `Recoverable+Purgeable`.
    pub recovery_level: Option<String>,
    pub recoverable_days: Option<i32>,
    pub tags: HashMap<String, String>,
    /// Set when the secret backs a certificate.
    pub key_id: Option<String>,
    /// Whether the secret's lifetime is managed by Key Vault.
    pub managed: bool,
}

impl SecretProperties {
    pub(crate) fn from_bundle(bundle: &SecretBundle) -> Self {
        let parsed = bundle.id.as_deref().and_then(KeyVaultResourceId::parse);
        let attributes = &bundle.attributes;
        Self {
            id: bundle.id.clone(),
            name: parsed.as_ref().map(|p| p.name.clone()),
            version: parsed.as_ref().and_then(|p| p.version.clone()),
            vault_url: parsed.map(|p| p.vault_url),
            content_type: bundle.content_type.clone(),
            enabled: attributes.enabled,
            not_before: attributes.not_before,
            expires_on: attributes.expires,
            created_on: attributes.created,
            updated_on: attributes.updated,
            recovery_level: attributes.recovery_level.clone(),
            recoverable_days: attributes.recoverable_days,
            tags: bundle.tags.clone(),
            key_id: bundle.kid.clone(),
            managed: bundle.managed,
        }
    }
}

/// A secret with its value.
///
/// The value is kept in a [`SecretString`] and is redacted from `Debug`
/// output. Use [`secrecy::ExposeSecret`] to read it.
#[derive(Debug, Clone)]
pub struct KeyVaultSecret {
    pub properties: SecretProperties,
    pub value: Option<SecretString>,
}

impl KeyVaultSecret {
    pub(crate) fn from_bundle(bundle: SecretBundle) -> Self {
        let properties = SecretProperties::from_bundle(&bundle);
        Self {
            properties,
            value: bundle.value.map(SecretString::from),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.name.as_deref()
    }
}

/// A secret in the deleted state of a soft-delete enabled vault.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedSecret {
    pub properties: SecretProperties,
    /// Identifier used to recover or purge the secret. Absent when the vault
    /// does not have soft-delete enabled.
    pub recovery_id: Option<String>,
    pub scheduled_purge_date: Option<u64>,
    pub deleted_date: Option<u64>,
}

impl DeletedSecret {
    pub(crate) fn from_bundle(bundle: DeletedSecretBundle) -> Self {
        Self {
            properties: SecretProperties::from_bundle(&bundle.secret),
            recovery_id: bundle.recovery_id,
            scheduled_purge_date: bundle.scheduled_purge_date,
            deleted_date: bundle.deleted_date,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.name.as_deref()
    }
}

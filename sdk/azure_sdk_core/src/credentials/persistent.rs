use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{AccessToken, TokenCredential};
use crate::error::{AzureError, AzureResult};

/// Cache name shared with developer tools.
pub const DEFAULT_CACHE_NAME: &str = "msal.cache";

const CACHE_DIR: &str = ".IdentityService";
const CAE_SUFFIX: &str = ".cae";
const NON_CAE_SUFFIX: &str = ".nocae";

/// Cached tokens this close to expiry are refreshed from the inner credential.
const REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// Where and how tokens are persisted.
#[derive(Debug, Clone)]
pub struct TokenCachePersistenceOptions {
    /// Prefix of the cache file name, used to isolate caches from each other.
    pub name: String,
    /// Store tokens in a plain-text file. Required: no encrypted backend is
    /// available.
    pub allow_unencrypted_storage: bool,
    /// Use the cache for continuous-access-evaluation tokens.
    pub cae: bool,
    /// Directory override. Defaults to `~/.IdentityService`
    /// (`%LOCALAPPDATA%\.IdentityService` on Windows).
    pub directory: Option<PathBuf>,
}

impl Default for TokenCachePersistenceOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_CACHE_NAME.to_string(),
            allow_unencrypted_storage: false,
            cae: false,
            directory: None,
        }
    }
}

impl TokenCachePersistenceOptions {
    /// Full path of the cache file.
    pub fn cache_path(&self) -> AzureResult<PathBuf> {
        let dir = match &self.directory {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        let suffix = if self.cae { CAE_SUFFIX } else { NON_CAE_SUFFIX };
        Ok(dir.join(format!("{}{}", self.name, suffix)))
    }
}

fn default_cache_dir() -> AzureResult<PathBuf> {
    let base = if cfg!(windows) {
        std::env::var_os("LOCALAPPDATA")
    } else {
        std::env::var_os("HOME")
    };
    base.map(|b| PathBuf::from(b).join(CACHE_DIR)).ok_or_else(|| {
        AzureError::MissingConfig("cannot locate a home directory for the token cache".into())
    })
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    tokens: BTreeMap<String, CachedToken>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    secret: String,
    expires_on: u64,
}

/// Wraps a credential with a token cache that survives process restarts.
///
/// The cache is a JSON file read and written whole. Concurrent processes are
/// not coordinated: the last writer wins.
pub struct PersistentTokenCredential {
    inner: Arc<dyn TokenCredential>,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl PersistentTokenCredential {
    /// Cache tokens from `inner` in the file `options` describe.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Credential`] unless
    /// `allow_unencrypted_storage` is set, and an error if the cache location
    /// cannot be determined.
    pub fn new(
        inner: Arc<dyn TokenCredential>,
        options: TokenCachePersistenceOptions,
    ) -> AzureResult<Self> {
        if !options.allow_unencrypted_storage {
            return Err(AzureError::Credential(
                "token cache encryption is not available on this platform. \
                 Set allow_unencrypted_storage to store the cache unencrypted."
                    .into(),
            ));
        }
        let path = options.cache_path()?;
        tracing::debug!(path = %path.display(), "using persistent token cache");

        Ok(Self {
            inner,
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CacheFile {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring unreadable token cache");
                CacheFile::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable token cache");
                CacheFile::default()
            }
        }
    }

    async fn store(&self, cache: &CacheFile) -> AzureResult<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = temp_path(&self.path);
        if let Err(e) = write_private(&tmp, &serde_json::to_vec(cache)?).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// A sibling of `path` unique to this write.
fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.{:016x}.tmp", fastrand::u64(..)))
}

/// Create `path` readable by the owner only, then write `bytes` to it.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn cache_key(scopes: &[String]) -> String {
    let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(" ")
}

impl std::fmt::Debug for PersistentTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTokenCredential")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for PersistentTokenCredential {
    async fn get_token(&self, scopes: &[String]) -> AzureResult<AccessToken> {
        let key = cache_key(scopes);

        if let Some(cached) = self.load().await.tokens.get(&key) {
            let token = AccessToken::new(
                cached.secret.clone(),
                UNIX_EPOCH + Duration::from_secs(cached.expires_on),
            );
            if !token.expires_within(REFRESH_WINDOW) {
                tracing::trace!("token cache hit");
                return Ok(token);
            }
        }

        let token = self.inner.get_token(scopes).await?;

        let _guard = self.write_lock.lock().await;
        let mut cache = self.load().await;
        cache.tokens.insert(
            key,
            CachedToken {
                secret: token.token.expose_secret().to_string(),
                expires_on: token.expires_on_unix(),
            },
        );
        if let Err(e) = self.store(&cache).await {
            tracing::warn!(error = %e, "failed to persist token cache");
        }

        Ok(token)
    }
}

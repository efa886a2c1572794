//! Bearer-token management shared by every request of the process.
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

use crate::config::Config;
use crate::invoice::canonical::sha256_hex;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token store lock poisoned")]
    Poisoned,
    #[error("failed to access token store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing client credentials for token refresh")]
    MissingClientCredentials,
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("token endpoint returned status {status}: {body}")]
    RefreshRejected { status: u16, body: String },
}

/// Opaque bearer token. `Debug` prints only its fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters of the token's SHA-256, safe to log.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.0.as_bytes())[..8].to_string()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({})", self.fingerprint())
    }
}

/// Persisted settings holding the current token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<BearerToken>, CredentialError>;
    fn save(&self, token: &BearerToken) -> Result<(), CredentialError>;
}

/// Issues fresh tokens from stored client credentials.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_token(&self) -> Result<BearerToken, CredentialError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<BearerToken>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<BearerToken>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<BearerToken>, CredentialError> {
        Ok(self
            .token
            .lock()
            .map_err(|_| CredentialError::Poisoned)?
            .clone())
    }

    fn save(&self, token: &BearerToken) -> Result<(), CredentialError> {
        *self.token.lock().map_err(|_| CredentialError::Poisoned)? = Some(token.clone());
        Ok(())
    }
}

/// Token kept as plain text in a single file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<BearerToken>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| BearerToken::new(token)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, token: &BearerToken) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CredentialError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, token.as_str()).map_err(|source| CredentialError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth client-credentials exchange against the MyInvois identity service.
#[derive(Debug)]
pub struct ClientCredentialsRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsRefresher {
    pub fn new(
        identity_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;
        Ok(Self {
            client,
            token_url: format!("{}connect/token", identity_url),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        let (Some(client_id), Some(client_secret)) = (config.client_id(), config.client_secret())
        else {
            return Err(CredentialError::MissingClientCredentials);
        };
        Self::new(
            &config.identity_url(),
            client_id,
            client_secret,
            config.timeout(),
        )
    }
}

#[async_trait]
impl TokenRefresher for ClientCredentialsRefresher {
    async fn refresh_token(&self) -> Result<BearerToken, CredentialError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", "InvoicingAPI"),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CredentialError::RefreshRejected {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| CredentialError::Refresh(format!("invalid token response: {e}")))?;
        Ok(BearerToken::new(parsed.access_token))
    }
}

/// Reads the persisted token before each request and serializes refreshes.
///
/// Concurrent requests that all saw the same stale token trigger a single
/// refresh: the first one through the lock refreshes and persists, the rest
/// find a different token in the store and reuse it.
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The persisted token, fetching one first if none was ever stored.
    pub async fn current(&self) -> Result<BearerToken, CredentialError> {
        match self.store.load()? {
            Some(token) => Ok(token),
            None => self.refresh_unless_replaced(None).await,
        }
    }

    /// Called after the server rejected `stale` as unauthorized.
    pub async fn refresh_after_unauthorized(
        &self,
        stale: &BearerToken,
    ) -> Result<BearerToken, CredentialError> {
        self.refresh_unless_replaced(Some(stale)).await
    }

    async fn refresh_unless_replaced(
        &self,
        stale: Option<&BearerToken>,
    ) -> Result<BearerToken, CredentialError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(stored) = self.store.load()? {
            if stale != Some(&stored) {
                tracing::debug!(
                    token = %stored.fingerprint(),
                    "token already replaced by a concurrent refresh"
                );
                return Ok(stored);
            }
        }

        let token = self.refresher.refresh_token().await?;
        self.store.save(&token)?;
        tracing::info!(
            stale = %stale.map(BearerToken::fingerprint).unwrap_or_default(),
            token = %token.fingerprint(),
            "refreshed bearer token"
        );
        Ok(token)
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager").finish_non_exhaustive()
    }
}

//! Artifact Store
//!
//! Durable copies of generated bundles. Keys are forward-slash paths such as
//! `projects/{bundle_id}/backend/app.py`.

use crate::config::{StoreConfig, StoreKind};
use async_trait::async_trait;
use sdk::errors::PipelineError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn name(&self) -> &str;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError>;
}

/// Build the configured store, if any
pub fn from_config(config: &StoreConfig) -> Result<Option<Arc<dyn ArtifactStore>>, PipelineError> {
    match config.kind {
        StoreKind::None => Ok(None),
        StoreKind::Filesystem => Ok(Some(Arc::new(FsArtifactStore::new(config.root.clone())))),
        StoreKind::Http => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                PipelineError::Config("store.base_url is required for the http store".to_string())
            })?;
            let token = config
                .token_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|token| !token.is_empty());
            Ok(Some(Arc::new(
                HttpArtifactStore::new(base_url, token).with_timeout(config.timeout()),
            )))
        }
    }
}

/// Reject keys that would escape the store root
fn validate_key(key: &str) -> Result<(), PipelineError> {
    let path = Path::new(key);
    let escapes = key.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(PipelineError::StorageUpload(format!("invalid key '{}'", key)));
    }
    Ok(())
}

/// Store rooted in a local directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::StorageUpload(format!("{}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::StorageUpload(format!("{}: {}", path.display(), e)))
    }
}

/// Store that PUTs each object to `{base_url}/{key}`
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Self::client(DEFAULT_REQUEST_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Self::client(timeout);
        self
    }

    fn client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        validate_key(key)?;
        let url = format!("{}/{}", self.base_url, key);

        let mut request = self.client.put(&url).body(bytes.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::StorageUpload(format!("PUT {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::StorageUpload(format!(
                "PUT {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

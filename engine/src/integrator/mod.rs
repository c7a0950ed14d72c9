//! Integrator
//!
//! Assembles the generated backend and frontend sources into a `ProjectBundle`
//! on disk:
//!
//! ```text
//! {projects_dir}/{bundle_id}/
//!   backend/app.py
//!   backend/requirements.txt
//!   frontend/App.jsx
//!   frontend/index.html
//!   frontend/package.json
//!   frontend/config.js
//!   README.md
//!   bundle.json
//! ```
//!
//! `backend/` and `frontend/` are replaced on every integration, so running it
//! twice with the same id yields the same tree. After local assembly every
//! file is uploaded to the configured `ArtifactStore`, concurrently and
//! within the upload timeout. Upload failures and timeouts are logged and
//! never change the result.

use chrono::{DateTime, Utc};
use sdk::errors::PipelineError;
use sdk::{CodeArtifact, ProjectBundle, StackTag, UiArtifact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

pub mod store;
pub mod templates;

pub use store::{ArtifactStore, FsArtifactStore, HttpArtifactStore};

pub const MANIFEST_FILE: &str = "bundle.json";

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of `bundle.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Contents of `bundle.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub backend_stack: StackTag,
    pub frontend_stack: StackTag,
    pub files: Vec<ManifestEntry>,
}

pub fn new_bundle_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("generated_project_{}", &uuid[..8])
}

/// Compute the SHA-256 hash of `data` and return hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Entry file of a backend the deploy commands can run
fn backend_entry(stack: &StackTag) -> Result<&'static str, PipelineError> {
    match (stack.language.as_str(), stack.framework.as_str()) {
        ("python", "fastapi") => Ok("app.py"),
        _ => Err(PipelineError::Integration(format!(
            "unsupported backend stack {}",
            stack
        ))),
    }
}

/// Entry file of a frontend the `index.html` scaffold can load
fn frontend_entry(stack: &StackTag) -> Result<&'static str, PipelineError> {
    match (stack.language.as_str(), stack.framework.as_str()) {
        ("javascript", "react") => Ok("App.jsx"),
        _ => Err(PipelineError::Integration(format!(
            "unsupported frontend stack {}",
            stack
        ))),
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Integration(format!("{}: {}", path.display(), e))
}

pub struct Integrator {
    projects_dir: PathBuf,
    store: Option<Arc<dyn ArtifactStore>>,
    upload_timeout: Duration,
}

impl Integrator {
    pub fn new(projects_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            store: None,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bound on uploading one bundle
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Assemble a bundle under a fresh id
    pub async fn integrate(
        &self,
        backend: &CodeArtifact,
        ui: &UiArtifact,
    ) -> Result<ProjectBundle, PipelineError> {
        self.integrate_with_id(&new_bundle_id(), backend, ui).await
    }

    /// Assemble a bundle under `bundle_id`, replacing any previous tree
    pub async fn integrate_with_id(
        &self,
        bundle_id: &str,
        backend: &CodeArtifact,
        ui: &UiArtifact,
    ) -> Result<ProjectBundle, PipelineError> {
        let span = tracing::info_span!("integrate", bundle_id);
        self.assemble(bundle_id, backend, ui).instrument(span).await
    }

    async fn assemble(
        &self,
        bundle_id: &str,
        backend: &CodeArtifact,
        ui: &UiArtifact,
    ) -> Result<ProjectBundle, PipelineError> {
        if backend.source.trim().is_empty() || ui.source.trim().is_empty() {
            return Err(PipelineError::Integration(
                "backend and frontend sources must be non-empty".to_string(),
            ));
        }

        let backend_file = backend_entry(&backend.stack)?;
        let frontend_file = frontend_entry(&ui.stack)?;
        let root = self.projects_dir.join(bundle_id);

        let mut files = BTreeMap::new();
        files.insert(
            format!("backend/{}", backend_file),
            backend.source.clone(),
        );
        files.insert(
            "backend/requirements.txt".to_string(),
            templates::requirements_txt(&backend.source),
        );
        files.insert(
            format!("frontend/{}", frontend_file),
            ui.source.clone(),
        );
        files.insert("frontend/index.html".to_string(), templates::index_html());
        files.insert(
            "frontend/package.json".to_string(),
            templates::package_json(bundle_id),
        );
        files.insert("frontend/config.js".to_string(), templates::config_js());
        files.insert("README.md".to_string(), templates::readme(bundle_id, &root));

        for dir in ["backend", "frontend"] {
            let path = root.join(dir);
            if tokio::fs::try_exists(&path).await.map_err(|e| io_error(&path, e))? {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
            }
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
        }

        for (relative, content) in &files {
            let path = root.join(relative);
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| io_error(&path, e))?;
        }

        let created_at = Utc::now();
        let manifest = BundleManifest {
            id: bundle_id.to_string(),
            created_at,
            backend_stack: backend.stack.clone(),
            frontend_stack: ui.stack.clone(),
            files: files
                .iter()
                .map(|(path, content)| ManifestEntry {
                    path: path.clone(),
                    size: content.len() as u64,
                    sha256: compute_hash(content.as_bytes()),
                })
                .collect(),
        };
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::Integration(format!("manifest: {}", e)))?;
        let manifest_path = root.join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, &manifest_json)
            .await
            .map_err(|e| io_error(&manifest_path, e))?;
        files.insert(MANIFEST_FILE.to_string(), manifest_json);

        tracing::info!(root = %root.display(), files = files.len(), "Bundle written");

        let bundle = ProjectBundle {
            id: bundle_id.to_string(),
            root,
            files,
            created_at,
        };

        self.upload(&bundle).await;
        Ok(bundle)
    }

    /// Copy every bundle file to the store under `projects/{bundle_id}/`
    async fn upload(&self, bundle: &ProjectBundle) {
        let Some(store) = &self.store else {
            return;
        };

        let puts = bundle.files.iter().map(|(path, content)| async move {
            let key = format!("projects/{}/{}", bundle.id, path);
            let result = store.put(&key, content.as_bytes()).await;
            if let Err(e) = &result {
                tracing::warn!(
                    bundle_id = %bundle.id,
                    store = store.name(),
                    key = %key,
                    error = %e,
                    "Bundle upload failed"
                );
            }
            result.is_ok()
        });

        let all = futures::future::join_all(puts);
        let uploaded = match tokio::time::timeout(self.upload_timeout, all).await {
            Ok(results) => results.into_iter().filter(|ok| *ok).count(),
            Err(_) => {
                tracing::warn!(
                    bundle_id = %bundle.id,
                    store = store.name(),
                    timeout_secs = self.upload_timeout.as_secs(),
                    "Bundle upload timed out"
                );
                return;
            }
        };
        tracing::info!(
            bundle_id = %bundle.id,
            store = store.name(),
            uploaded,
            total = bundle.files.len(),
            "Bundle upload finished"
        );
    }
}

/// Read a bundle back from disk using its `bundle.json`
pub async fn load_bundle(root: &Path) -> Result<ProjectBundle, PipelineError> {
    let manifest_path = root.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&manifest_path)
        .await
        .map_err(|e| io_error(&manifest_path, e))?;
    let manifest: BundleManifest = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::Integration(format!("{}: {}", manifest_path.display(), e)))?;

    let mut files = BTreeMap::new();
    for entry in &manifest.files {
        let path = root.join(&entry.path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        files.insert(entry.path.clone(), content);
    }
    files.insert(MANIFEST_FILE.to_string(), raw);

    let bundle = ProjectBundle {
        id: manifest.id,
        root: root.to_path_buf(),
        files,
        created_at: manifest.created_at,
    };
    if !bundle.has_entries_under("backend") || !bundle.has_entries_under("frontend") {
        return Err(PipelineError::Integration(format!(
            "{} has no backend or frontend sources",
            root.display()
        )));
    }
    Ok(bundle)
}

//! Durable delegated-token storage
//!
//! Exactly one record per deployment, kept in memory, in a local JSON file,
//! or in a cloud blob addressed by a SAS URL. Writes are unconditional
//! overwrites; the last writer wins.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, info, warn};
use url::Url;

use super::token::Token;
use crate::config::Config;
use crate::{Error, Result};

/// What a failed save means to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Failure propagates as an error
    MustSucceed,
    /// Failure is logged and reported as [`SaveOutcome::Failed`]
    BestEffort,
}

/// Result of [`persist`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written
    Persisted,
    /// A best-effort backend could not write the record
    Failed(String),
}

impl SaveOutcome {
    /// Whether the record reached durable storage
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted)
    }
}

/// Storage backend for the single durable token record
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Contract for failed saves
    fn save_policy(&self) -> SavePolicy;

    /// Read the record, `None` when absent
    async fn load(&self) -> Result<Option<Token>>;

    /// Overwrite the record
    async fn save(&self, token: &Token) -> Result<()>;

    /// Opaque modification marker of the record, `None` when absent.
    /// Changes on every write; never requires reading the token itself.
    async fn last_modified(&self) -> Result<Option<String>>;
}

/// Save through a backend, applying its [`SavePolicy`]
pub async fn persist(backend: &dyn TokenBackend, token: &Token) -> Result<SaveOutcome> {
    match backend.save(token).await {
        Ok(()) => Ok(SaveOutcome::Persisted),
        Err(e) => match backend.save_policy() {
            SavePolicy::MustSucceed => Err(e),
            SavePolicy::BestEffort => {
                warn!(backend = backend.name(), error = %e, "Best-effort token save failed");
                Ok(SaveOutcome::Failed(e.to_string()))
            }
        },
    }
}

/// Build the backend selected by configuration: blob when a storage URL is
/// set, local file otherwise
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn TokenBackend>> {
    if let Some(url) = config.storage.cloud_url() {
        let backend = BlobTokenBackend::new(url, config.timeout())?;
        info!(url = %backend.display_url(), "Using blob token storage");
        Ok(Arc::new(backend))
    } else {
        let path = config.storage.token_path();
        info!(path = %path.display(), "Using file token storage");
        Ok(Arc::new(FileTokenBackend::new(path)))
    }
}

// ── Memory ────────────────────────────────────────────────────────────────

/// Process-local backend for tests and embedders
#[derive(Debug, Default)]
pub struct MemoryTokenBackend {
    record: RwLock<Option<Token>>,
    generation: AtomicU64,
}

impl MemoryTokenBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record without going through the trait
    pub fn get(&self) -> Option<Token> {
        self.record.read().clone()
    }
}

#[async_trait]
impl TokenBackend for MemoryTokenBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn save_policy(&self) -> SavePolicy {
        SavePolicy::MustSucceed
    }

    async fn load(&self) -> Result<Option<Token>> {
        Ok(self.get())
    }

    async fn save(&self, token: &Token) -> Result<()> {
        *self.record.write() = Some(token.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn last_modified(&self) -> Result<Option<String>> {
        if self.record.read().is_none() {
            return Ok(None);
        }
        Ok(Some(self.generation.load(Ordering::Acquire).to_string()))
    }
}

// ── Local file ────────────────────────────────────────────────────────────

/// Token record in a local JSON file
#[derive(Debug, Clone)]
pub struct FileTokenBackend {
    path: PathBuf,
}

impl FileTokenBackend {
    /// Backend writing to `path`
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Record location
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TokenBackend for FileTokenBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn save_policy(&self) -> SavePolicy {
        SavePolicy::MustSucceed
    }

    async fn load(&self) -> Result<Option<Token>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token found");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Storage(format!("Failed to read token file: {e}")));
            }
        };

        let token = serde_json::from_str::<Token>(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse stored token: {e}")))?;
        Ok(Some(token))
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!("Failed to create token storage dir: {e}"))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write token file: {e}")))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = tokio::fs::set_permissions(&self.path, perms).await;
        }

        info!(path = %self.path.display(), "Saved delegated token");
        Ok(())
    }

    async fn last_modified(&self) -> Result<Option<String>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                let nanos = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
                Ok(Some(format!("{nanos}:{}", meta.len())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Cloud blob ────────────────────────────────────────────────────────────

/// Token record in a cloud blob reached through a pre-signed (SAS) URL
#[derive(Debug, Clone)]
pub struct BlobTokenBackend {
    http_client: Client,
    url: String,
}

impl BlobTokenBackend {
    /// Backend for the blob at `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    /// URL without the signature query, safe to log
    #[must_use]
    pub fn display_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                url.set_query(None);
                url.to_string()
            }
            Err(_) => "<invalid blob url>".to_string(),
        }
    }

    fn transport(&self, action: &str, e: reqwest::Error) -> Error {
        // reqwest errors embed the full URL, signature included
        Error::Transport(format!(
            "Blob {action} failed for {}: {}",
            self.display_url(),
            e.without_url()
        ))
    }
}

#[async_trait]
impl TokenBackend for BlobTokenBackend {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn save_policy(&self) -> SavePolicy {
        SavePolicy::BestEffort
    }

    async fn load(&self) -> Result<Option<Token>> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.transport("read", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %self.display_url(), "No stored token blob");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "Blob read failed: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(|e| self.transport("read", e))?;
        let token = serde_json::from_str::<Token>(&body)
            .map_err(|e| Error::Storage(format!("Failed to parse stored token blob: {e}")))?;
        Ok(Some(token))
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let body = serde_json::to_string_pretty(token)?;
        let response = self
            .http_client
            .put(&self.url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport("write", e))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "Blob write failed: HTTP {}",
                response.status()
            )));
        }

        info!(url = %self.display_url(), "Saved delegated token to blob storage");
        Ok(())
    }

    async fn last_modified(&self) -> Result<Option<String>> {
        let response = self
            .http_client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| self.transport("stat", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "Blob stat failed: HTTP {}",
                response.status()
            )));
        }

        let headers = response.headers();
        let marker = headers
            .get(header::LAST_MODIFIED)
            .or_else(|| headers.get(header::ETAG))
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            // The blob exists but exposes no marker; treat as a fixed stamp
            .unwrap_or_else(|| "present".to_string());
        Ok(Some(marker))
    }
}

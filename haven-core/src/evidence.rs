//! Evidence file storage on the local filesystem.
//!
//! Keys look like `<user-id or "anonymous">/<uuid>.<ext>` and are the only
//! thing recorded on the incident.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::EvidenceConfig;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("evidence file is empty")]
    Empty,

    #[error("evidence file is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("content type {0} is not accepted")]
    UnsupportedType(String),

    #[error("declared content type {declared} does not match file contents ({detected})")]
    TypeMismatch { declared: String, detected: String },

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sniff the MIME type from magic bytes.
pub fn detect_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data).map(|t| t.mime_type())
}

/// Strip parameters and normalize case: `Image/PNG; q=1` -> `image/png`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
    max_bytes: usize,
    allowed: Vec<String>,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize, allowed: Vec<String>) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            allowed: allowed.iter().map(|m| essence(m)).collect(),
        }
    }

    pub fn from_config(config: &EvidenceConfig) -> Self {
        let root = shellexpand::tilde(&config.root_dir).to_string();
        Self::new(root, config.max_bytes, config.allowed_mime_types.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Check size, allow-list and magic bytes. Returns the file extension
    /// for the detected type.
    pub fn validate(&self, declared: &str, data: &[u8]) -> Result<&'static str, EvidenceError> {
        if data.is_empty() {
            return Err(EvidenceError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(EvidenceError::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let declared = essence(declared);
        if !self.allowed.contains(&declared) {
            return Err(EvidenceError::UnsupportedType(declared));
        }

        match infer::get(data) {
            Some(kind) if kind.mime_type() == declared => Ok(kind.extension()),
            Some(kind) => Err(EvidenceError::TypeMismatch {
                declared,
                detected: kind.mime_type().to_string(),
            }),
            None => Err(EvidenceError::TypeMismatch {
                declared,
                detected: "unknown".to_string(),
            }),
        }
    }

    pub fn storage_key(user_id: Option<Uuid>, extension: &str) -> String {
        let owner = user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        format!("{}/{}.{}", owner, Uuid::new_v4(), extension)
    }

    /// Resolve a key below the root. Keys that would escape it are rejected.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, EvidenceError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(EvidenceError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Validate and write an upload; returns its storage key.
    pub async fn store(
        &self,
        user_id: Option<Uuid>,
        declared: &str,
        data: &[u8],
    ) -> Result<String, EvidenceError> {
        let extension = self.validate(declared, data)?;
        let key = Self::storage_key(user_id, extension);
        let path = self.path_for(&key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        tracing::info!(key = %key, bytes = data.len(), "Evidence stored");
        Ok(key)
    }
}

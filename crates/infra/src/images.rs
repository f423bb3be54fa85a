//! Villa image storage.
//!
//! Keys are flat file names generated here; callers never choose a path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageStoreError {
    #[error("invalid image key '{0}'")]
    InvalidKey(String),

    #[error("image io error: {0}")]
    Io(String),
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `bytes` and return the generated key. The original file name
    /// only contributes its extension.
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, ImageStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ImageStoreError>;

    /// Remove the image. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), ImageStoreError>;
}

fn generate_key(original_name: &str) -> String {
    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);

    match extension {
        Some(ext) => format!("{}.{}", Uuid::now_v7(), ext),
        None => Uuid::now_v7().to_string(),
    }
}

fn check_key(key: &str) -> Result<(), ImageStoreError> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(ImageStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Best-effort removal of `keys`. Failures are logged and skipped.
pub async fn remove_all(store: &dyn ImageStore, keys: &[String]) {
    for key in keys {
        if let Err(e) = store.remove(key).await {
            warn!(key = %key, error = %e, "failed to remove image");
        }
    }
}

/// Images as files under one directory.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ImageStoreError::Io(e.to_string()))?;

        let key = generate_key(original_name);
        let path = self.path(&key)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ImageStoreError::Io(e.to_string()))?;

        debug!(key = %key, size = bytes.len(), "image saved");
        Ok(key)
    }

    async fn exists(&self, key: &str) -> Result<bool, ImageStoreError> {
        let path = self.path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ImageStoreError::Io(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), ImageStoreError> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageStoreError::Io(e.to_string())),
        }
    }
}

/// In-memory image store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        let key = generate_key(original_name);
        self.images
            .write()
            .map_err(|_| ImageStoreError::Io("lock poisoned".to_string()))?
            .insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn exists(&self, key: &str) -> Result<bool, ImageStoreError> {
        check_key(key)?;
        Ok(self
            .images
            .read()
            .map_err(|_| ImageStoreError::Io("lock poisoned".to_string()))?
            .contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<(), ImageStoreError> {
        check_key(key)?;
        self.images
            .write()
            .map_err(|_| ImageStoreError::Io("lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

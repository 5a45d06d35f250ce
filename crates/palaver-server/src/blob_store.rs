//! On-disk storage for uploaded files. Metadata lives in the database; this
//! module only owns the bytes, one file per [`BlobId`].

use std::path::{Component, Path, PathBuf};

use palaver_shared::BlobId;
use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

/// Reject any path that would resolve outside `base`.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let relative = target.strip_prefix(base).unwrap_or(target);

    let mut resolved = canonical_base.clone();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()))
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Result of writing a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub id: BlobId,
    pub size: usize,
    /// BLAKE3 of the content, hex encoded.
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::BlobStorage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store(&self, data: &[u8]) -> Result<StoredBlob, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Validation("File is empty".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = BlobId::new();
        let path = self.blob_path(id)?;
        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("Failed to write blob {id}: {e}")))?;

        let hash = blake3::hash(data).to_hex().to_string();
        debug!(id = %id, size = data.len(), hash = %hash, "Stored blob");
        Ok(StoredBlob {
            id,
            size: data.len(),
            hash,
        })
    }

    pub async fn read(&self, id: BlobId) -> Result<Vec<u8>, ServerError> {
        let path = self.blob_path(id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServerError::NotFound("File"));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("Failed to read blob {id}: {e}")))?;

        debug!(id = %id, size = data.len(), "Read blob");
        Ok(data)
    }

    /// Remove a blob. Used to roll back an upload whose metadata insert failed.
    pub async fn delete(&self, id: BlobId) -> Result<(), ServerError> {
        let path = self.blob_path(id)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("Failed to delete blob {id}: {e}")))?;
        debug!(id = %id, "Deleted blob");
        Ok(())
    }

    fn blob_path(&self, id: BlobId) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &self.base_path.join(id.to_string()))
    }
}

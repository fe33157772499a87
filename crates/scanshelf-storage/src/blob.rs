//! Blob storage for uploaded file contents.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::progress::ProgressTracker;

/// Chunk size for streamed writes; progress is reported once per chunk.
const WRITE_CHUNK: usize = 64 * 1024;

/// Keyed byte storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, reporting byte progress. Fails with
    /// `Conflict` if the key is already taken.
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        progress: &ProgressTracker,
    ) -> Result<(), ScanshelfError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ScanshelfError>;

    /// Remove every key in `keys`. Missing keys are not an error.
    async fn remove(&self, keys: &[String]) -> Result<(), ScanshelfError>;

    async fn exists(&self, key: &str) -> Result<bool, ScanshelfError>;
}

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ScanshelfError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Reject keys that could escape the store root.
fn validate_key(key: &str) -> Result<(), ScanshelfError> {
    if key.is_empty() || key.contains('\0') || key.contains('\\') {
        return Err(ScanshelfError::Blob(format!("Invalid storage key: {:?}", key)));
    }
    let path = Path::new(key);
    if path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ScanshelfError::Blob(format!("Invalid storage key: {:?}", key)));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        progress: &ProgressTracker,
    ) -> Result<(), ScanshelfError> {
        let full_path = self.path_for(key)?;
        if fs::try_exists(&full_path).await? {
            return Err(ScanshelfError::Conflict(format!(
                "Storage key already in use: {}",
                key
            )));
        }
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "Failed to create blob directory");
                ScanshelfError::Blob(format!("Failed to create directory: {}", e))
            })?;
        }

        // Write to a sibling temp file, then rename into place.
        let mut temp_name = full_path.clone().into_os_string();
        temp_name.push(".part");
        let temp_path = PathBuf::from(temp_name);
        let total = data.len() as u64;
        progress.report_bytes(0, total.max(1));

        let write_result = async {
            let mut file = fs::File::create(&temp_path).await?;
            let mut written = 0u64;
            for chunk in data.chunks(WRITE_CHUNK) {
                file.write_all(chunk).await?;
                written += chunk.len() as u64;
                progress.report_bytes(written, total);
            }
            file.sync_all().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ScanshelfError::Blob(format!("Failed to write blob {}: {}", key, e)));
        }
        if total == 0 {
            progress.report_bytes(0, 0);
        }

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "Blob rename failed");
            ScanshelfError::Blob(format!("Failed to finalize blob {}: {}", key, e))
        })?;

        debug!(key, size = total, "Blob stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ScanshelfError> {
        let full_path = self.path_for(key)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ScanshelfError::NotFound(format!("Blob {}", key)))
            }
            Err(e) => Err(ScanshelfError::Blob(format!("Failed to read blob {}: {}", key, e))),
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<(), ScanshelfError> {
        for key in keys {
            let full_path = self.path_for(key)?;
            match fs::remove_file(&full_path).await {
                Ok(()) => debug!(key = %key, "Blob removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ScanshelfError::Blob(format!(
                        "Failed to remove blob {}: {}",
                        key, e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ScanshelfError> {
        let full_path = self.path_for(key)?;
        Ok(fs::try_exists(&full_path).await?)
    }
}

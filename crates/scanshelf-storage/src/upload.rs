//! File intake and the upload orchestrator.
//!
//! An upload is two writes that must stay consistent: the blob and the
//! metadata row pointing at it. The orchestrator stores the blob first and
//! removes it again if the row cannot be written, so a failed upload never
//! leaves an orphaned blob behind. Deletion runs in the opposite order and
//! reports `PartialDelete` when only the blob could be removed.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};
use uuid::Uuid;

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::events::{DomainEvent, EventBus};
use scanshelf_core::format::format_size_limit;
use scanshelf_core::progress::ProgressTracker;
use scanshelf_core::types::{NewUpload, UploadRecord};

use crate::blob::BlobStore;

/// Message shown to users for any upload failure other than validation.
pub const UPLOAD_FAILED_MESSAGE: &str = "Failed to upload file. Please try again.";

const KEY_SUFFIX_LEN: usize = 11;
const MAX_EXTENSION_LEN: usize = 16;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Metadata persistence for uploads.
pub trait UploadCatalog: Send + Sync {
    fn insert(&self, upload: &NewUpload) -> Result<UploadRecord, ScanshelfError>;
    fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, ScanshelfError>;
    /// All uploads owned by `user_id`, newest first.
    fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UploadRecord>, ScanshelfError>;
    /// Returns whether a row was deleted.
    fn delete(&self, id: Uuid) -> Result<bool, ScanshelfError>;
}

/// Check a file before anything is stored.
///
/// A file of exactly `max_bytes` is accepted.
pub fn validate_file(name: &str, size: u64, max_bytes: u64) -> Result<(), ScanshelfError> {
    if name.trim().is_empty() {
        return Err(ScanshelfError::Validation("File name must not be empty".into()));
    }
    if size > max_bytes {
        return Err(ScanshelfError::FileTooLarge {
            size,
            limit: max_bytes,
        });
    }
    Ok(())
}

/// User-facing text for a size rejection, e.g. "File size must be less than 100MB".
pub fn size_limit_message(max_bytes: u64) -> String {
    format!("File size must be less than {}", format_size_limit(max_bytes))
}

/// Build a storage key scoped to the user: `{user}/{random}_{millis}.{ext}`.
///
/// The extension is whatever follows the last `.` in `name` (the whole name
/// if it has none), reduced to ASCII alphanumerics.
pub fn generate_storage_key(user_id: Uuid, name: &str) -> String {
    let raw_ext = name.rsplit('.').next().unwrap_or_default();
    let mut ext: String = raw_ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        ext.push_str("bin");
    }

    let mut rng = rand::rng();
    let suffix: String = (0..KEY_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();

    format!(
        "{}/{}_{}.{}",
        user_id,
        suffix,
        Utc::now().timestamp_millis(),
        ext
    )
}

/// Coordinates blob storage and upload metadata.
pub struct UploadOrchestrator {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn UploadCatalog>,
    max_file_bytes: u64,
    events: EventBus,
}

impl UploadOrchestrator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn UploadCatalog>,
        max_file_bytes: u64,
        events: EventBus,
    ) -> Self {
        Self {
            blobs,
            catalog,
            max_file_bytes,
            events,
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Store `data` for `user_id` and record it.
    pub async fn upload(
        &self,
        user_id: Uuid,
        name: &str,
        data: &[u8],
        progress: &ProgressTracker,
    ) -> Result<UploadRecord, ScanshelfError> {
        let name = name.trim();
        validate_file(name, data.len() as u64, self.max_file_bytes)?;

        let storage_key = generate_storage_key(user_id, name);
        progress.reset();
        if let Err(e) = self.blobs.put(&storage_key, data, progress).await {
            error!(key = %storage_key, error = %e, "Blob write failed");
            return Err(ScanshelfError::Blob("blob write failed".to_string()));
        }

        let new_upload = NewUpload {
            user_id,
            name: name.to_string(),
            storage_key: storage_key.clone(),
            size_bytes: data.len() as u64,
        };

        let record = match self.catalog.insert(&new_upload) {
            Ok(record) => record,
            Err(insert_err) => {
                error!(key = %storage_key, error = %insert_err, "Upload metadata insert failed, removing blob");
                if let Err(cleanup_err) = self.blobs.remove(&[storage_key.clone()]).await {
                    warn!(key = %storage_key, error = %cleanup_err, "Failed to remove orphaned blob");
                }
                return Err(insert_err);
            }
        };

        info!(
            file_id = %record.id,
            user_id = %user_id,
            size = record.size_bytes,
            "File uploaded"
        );
        self.events.publish(DomainEvent::FileUploaded {
            file_id: record.id,
            user_id,
            name: record.name.clone(),
            size_bytes: record.size_bytes,
            timestamp: Utc::now(),
        });
        Ok(record)
    }

    /// Fetch a record owned by `user_id`. Other users' files read as missing.
    pub fn get(&self, user_id: Uuid, id: Uuid) -> Result<UploadRecord, ScanshelfError> {
        match self.catalog.get(id)? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(ScanshelfError::NotFound(format!("File {}", id))),
        }
    }

    /// Newest-first listing, optionally filtered by a case-insensitive name substring.
    pub fn list(
        &self,
        user_id: Uuid,
        query: Option<&str>,
    ) -> Result<Vec<UploadRecord>, ScanshelfError> {
        let records = self.catalog.list_for_user(user_id)?;
        let needle = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        Ok(match needle {
            Some(needle) => records
                .into_iter()
                .filter(|r| {
                    r.name.to_lowercase().contains(&needle)
                        || r.storage_key.to_lowercase().contains(&needle)
                })
                .collect(),
            None => records,
        })
    }

    pub async fn download(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<(UploadRecord, Vec<u8>), ScanshelfError> {
        let record = self.get(user_id, id)?;
        let bytes = match self.blobs.get(&record.storage_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(file_id = %id, key = %record.storage_key, error = %e, "Blob read failed");
                return Err(ScanshelfError::Blob("blob read failed".to_string()));
            }
        };
        Ok((record, bytes))
    }

    /// Remove the blob, then the row.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), ScanshelfError> {
        let record = self.get(user_id, id)?;
        self.blobs.remove(&[record.storage_key.clone()]).await?;

        if let Err(e) = self.catalog.delete(id) {
            error!(file_id = %id, key = %record.storage_key, error = %e, "Blob removed but metadata delete failed");
            return Err(ScanshelfError::PartialDelete {
                key: record.storage_key,
                reason: e.to_string(),
            });
        }

        info!(file_id = %id, user_id = %user_id, "File deleted");
        self.events.publish(DomainEvent::FileDeleted {
            file_id: id,
            user_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::blob::FilesystemBlobStore;
    use crate::db::Database;
    use crate::repository::UploadRepository;

    /// Catalog whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyCatalog {
        fail_insert: bool,
        fail_delete: bool,
        rows: Mutex<Vec<UploadRecord>>,
    }

    impl UploadCatalog for FlakyCatalog {
        fn insert(&self, upload: &NewUpload) -> Result<UploadRecord, ScanshelfError> {
            if self.fail_insert {
                return Err(ScanshelfError::Storage("insert refused".into()));
            }
            let record = UploadRecord {
                id: Uuid::new_v4(),
                user_id: upload.user_id,
                name: upload.name.clone(),
                storage_key: upload.storage_key.clone(),
                size_bytes: upload.size_bytes,
                created_at: Utc::now(),
            };
            self.rows.lock().unwrap().push(record.clone());
            Ok(record)
        }

        fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, ScanshelfError> {
            Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
        }

        fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UploadRecord>, ScanshelfError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect())
        }

        fn delete(&self, id: Uuid) -> Result<bool, ScanshelfError> {
            if self.fail_delete {
                return Err(ScanshelfError::Storage("delete refused".into()));
            }
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|r| r.id != id);
            Ok(rows.len() != before)
        }
    }

    /// Blob store that counts calls and keeps everything in memory.
    #[derive(Default)]
    struct CountingBlobs {
        fail_put: bool,
        puts: Mutex<usize>,
        blobs: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for CountingBlobs {
        async fn put(
            &self,
            key: &str,
            data: &[u8],
            progress: &ProgressTracker,
        ) -> Result<(), ScanshelfError> {
            *self.puts.lock().unwrap() += 1;
            if self.fail_put {
                return Err(ScanshelfError::Conflict(format!("Storage key already in use: {}", key)));
            }
            self.blobs.lock().unwrap().insert(key.to_string(), data.to_vec());
            progress.report_bytes(data.len() as u64, data.len() as u64);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, ScanshelfError> {
            self.blobs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| ScanshelfError::NotFound(key.to_string()))
        }

        async fn remove(&self, keys: &[String]) -> Result<(), ScanshelfError> {
            let mut blobs = self.blobs.lock().unwrap();
            for key in keys {
                blobs.remove(key);
            }
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, ScanshelfError> {
            Ok(self.blobs.lock().unwrap().contains_key(key))
        }
    }

    fn blob_count(dir: &std::path::Path) -> usize {
        let mut count = 0;
        let mut stack = vec![dir.to_path_buf()];
        while let Some(path) = stack.pop() {
            for entry in std::fs::read_dir(&path).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    stack.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_validate_file_boundary() {
        assert!(validate_file("a.png", 100, 100).is_ok());
        let err = validate_file("a.png", 101, 100).unwrap_err();
        assert!(matches!(err, ScanshelfError::FileTooLarge { size: 101, limit: 100 }));
        assert!(matches!(
            validate_file("  ", 1, 100),
            Err(ScanshelfError::Validation(_))
        ));
    }

    #[test]
    fn test_size_limit_message() {
        assert_eq!(
            size_limit_message(104_857_600),
            "File size must be less than 100MB"
        );
    }

    #[test]
    fn test_storage_key_shape() {
        let user = Uuid::new_v4();
        let key = generate_storage_key(user, "Scan 01.PNG");
        let (prefix, rest) = key.split_once('/').unwrap();
        assert_eq!(prefix, user.to_string());

        let (stem, ext) = rest.rsplit_once('.').unwrap();
        assert_eq!(ext, "png");
        let (random, millis) = stem.split_once('_').unwrap();
        assert_eq!(random.len(), 11);
        assert!(random.bytes().all(|b| BASE36.contains(&b)));
        assert!(millis.parse::<i64>().is_ok());
    }

    #[test]
    fn test_storage_key_extension_fallbacks() {
        let user = Uuid::new_v4();
        assert!(generate_storage_key(user, "README").ends_with(".readme"));
        assert!(generate_storage_key(user, "weird.../..").ends_with(".bin"));
        assert_ne!(
            generate_storage_key(user, "a.txt"),
            generate_storage_key(user, "a.txt")
        );
    }

    #[tokio::test]
    async fn test_upload_stores_one_blob_and_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FilesystemBlobStore::new(dir.path()));
        let catalog = Arc::new(UploadRepository::new(Arc::new(Database::in_memory().unwrap())));
        let orchestrator =
            UploadOrchestrator::new(blobs.clone(), catalog.clone(), 1024, EventBus::default());
        let user = Uuid::new_v4();
        let progress = ProgressTracker::new();

        let record = orchestrator
            .upload(user, "notes.txt", b"hello", &progress)
            .await
            .unwrap();

        assert_eq!(blob_count(dir.path()), 1);
        assert_eq!(catalog.count().unwrap(), 1);
        assert!(blobs.exists(&record.storage_key).await.unwrap());
        assert_eq!(progress.percent(), 100);

        let (_, bytes) = orchestrator.download(user, record.id).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_orphaned_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FilesystemBlobStore::new(dir.path()));
        let catalog = Arc::new(FlakyCatalog {
            fail_insert: true,
            ..Default::default()
        });
        let orchestrator = UploadOrchestrator::new(blobs, catalog, 1024, EventBus::default());

        let err = orchestrator
            .upload(Uuid::new_v4(), "doc.pdf", b"%PDF", &ProgressTracker::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ScanshelfError::Storage(_)));
        assert_eq!(blob_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_size_cap_boundary_and_no_store_call() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator = UploadOrchestrator::new(blobs.clone(), catalog, 8, EventBus::default());
        let user = Uuid::new_v4();

        orchestrator
            .upload(user, "exact.bin", &[0u8; 8], &ProgressTracker::new())
            .await
            .unwrap();
        assert_eq!(*blobs.puts.lock().unwrap(), 1);

        let err = orchestrator
            .upload(user, "over.bin", &[0u8; 9], &ProgressTracker::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanshelfError::FileTooLarge { size: 9, limit: 8 }));
        assert_eq!(*blobs.puts.lock().unwrap(), 1, "no store call for oversize file");
    }

    #[tokio::test]
    async fn test_list_filters_by_name_and_owner() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator = UploadOrchestrator::new(blobs, catalog, 1024, EventBus::default());
        let user = Uuid::new_v4();
        let progress = ProgressTracker::new();

        orchestrator.upload(user, "Invoice-March.pdf", b"1", &progress).await.unwrap();
        orchestrator.upload(user, "photo.jpg", b"2", &progress).await.unwrap();
        orchestrator.upload(Uuid::new_v4(), "invoice-other.pdf", b"3", &progress).await.unwrap();

        let all = orchestrator.list(user, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "photo.jpg");

        let filtered = orchestrator.list(user, Some("INVOICE")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Invoice-March.pdf");
    }

    #[tokio::test]
    async fn test_list_matches_storage_key() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator = UploadOrchestrator::new(blobs, catalog, 1024, EventBus::default());
        let user = Uuid::new_v4();
        let progress = ProgressTracker::new();

        let scan = orchestrator.upload(user, "scan.png", b"1", &progress).await.unwrap();
        orchestrator.upload(user, "notes.txt", b"2", &progress).await.unwrap();

        let suffix = scan.storage_key.rsplit('/').next().unwrap();
        let by_key = orchestrator.list(user, Some(&suffix.to_uppercase())).unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].id, scan.id);

        let by_extension = orchestrator.list(user, Some(".txt")).unwrap();
        assert_eq!(by_extension.len(), 1);
        assert_eq!(by_extension[0].name, "notes.txt");
    }

    #[tokio::test]
    async fn test_missing_blob_error_hides_storage_key() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator =
            UploadOrchestrator::new(blobs.clone(), catalog, 1024, EventBus::default());
        let user = Uuid::new_v4();
        let record = orchestrator
            .upload(user, "lost.txt", b"x", &ProgressTracker::new())
            .await
            .unwrap();
        blobs.remove(&[record.storage_key.clone()]).await.unwrap();

        let err = orchestrator.download(user, record.id).await.unwrap_err();
        assert!(matches!(err, ScanshelfError::Blob(_)));
        assert!(!err.to_string().contains(&record.storage_key));
    }

    #[tokio::test]
    async fn test_blob_write_error_hides_storage_key() {
        let blobs = Arc::new(CountingBlobs {
            fail_put: true,
            ..Default::default()
        });
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator =
            UploadOrchestrator::new(blobs, catalog.clone(), 1024, EventBus::default());
        let user = Uuid::new_v4();

        let err = orchestrator
            .upload(user, "clash.txt", b"x", &ProgressTracker::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanshelfError::Blob(_)));
        assert!(!err.to_string().contains(&user.to_string()));
        assert!(catalog.list_for_user(user).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_users_file_is_not_found() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let orchestrator = UploadOrchestrator::new(blobs, catalog, 1024, EventBus::default());
        let owner = Uuid::new_v4();
        let record = orchestrator
            .upload(owner, "mine.txt", b"x", &ProgressTracker::new())
            .await
            .unwrap();

        let err = orchestrator.delete(Uuid::new_v4(), record.id).await.unwrap_err();
        assert!(matches!(err, ScanshelfError::NotFound(_)));
        assert!(orchestrator.get(owner, record.id).is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_row() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog::default());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let orchestrator =
            UploadOrchestrator::new(blobs.clone(), catalog.clone(), 1024, events);
        let user = Uuid::new_v4();
        let record = orchestrator
            .upload(user, "gone.txt", b"x", &ProgressTracker::new())
            .await
            .unwrap();

        orchestrator.delete(user, record.id).await.unwrap();
        assert!(!blobs.exists(&record.storage_key).await.unwrap());
        assert!(catalog.get(record.id).unwrap().is_none());

        assert_eq!(rx.recv().await.unwrap().event_type(), "file_uploaded");
        assert_eq!(rx.recv().await.unwrap().event_type(), "file_deleted");
    }

    #[tokio::test]
    async fn test_delete_row_failure_is_partial() {
        let blobs = Arc::new(CountingBlobs::default());
        let catalog = Arc::new(FlakyCatalog {
            fail_delete: true,
            ..Default::default()
        });
        let orchestrator = UploadOrchestrator::new(blobs.clone(), catalog, 1024, EventBus::default());
        let user = Uuid::new_v4();
        let record = orchestrator
            .upload(user, "half.txt", b"x", &ProgressTracker::new())
            .await
            .unwrap();

        let err = orchestrator.delete(user, record.id).await.unwrap_err();
        match err {
            ScanshelfError::PartialDelete { key, .. } => assert_eq!(key, record.storage_key),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!blobs.exists(&record.storage_key).await.unwrap());
    }
}

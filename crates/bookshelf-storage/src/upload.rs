//! Asset upload client: one file, one object, one terminal result.
//!
//! The client checks the size limit and the MIME allow-list, writes the
//! bytes to the object store under the caller's destination key with a
//! timeout scaled by payload size, and records an [`AssetRecord`] in the
//! catalog. Expected failures come back as a tagged [`UploadError`]; the
//! client never panics on them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bookshelf_core::config::UploadConfig;
use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_core::traits::storage::TransferProgress;
use bookshelf_core::traits::{AssetCatalog, ObjectStore};
use bookshelf_core::types::{AssetRecord, AssetType};

use crate::keys::{self, KeyScope};

/// Failure of a single upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// The payload exceeds the configured size limit. Permanent.
    #[error("File is {size} bytes, larger than the {max} byte limit")]
    FileTooLarge {
        /// Payload size.
        size: u64,
        /// Configured limit.
        max: u64,
    },

    /// The MIME type is not on the allow-list. Permanent.
    #[error("File type '{0}' is not supported")]
    UnsupportedType(String),

    /// No valid credentials; the user may sign in and retry.
    #[error("Not signed in to storage: {0}")]
    Unauthenticated(String),

    /// The upload did not finish within its size-scaled deadline.
    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),

    /// The storage service could not be reached.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The storage service refused the object.
    #[error("Storage rejected the upload: {0}")]
    BackendRejected(String),
}

impl UploadError {
    /// Whether retrying the same file can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::FileTooLarge { .. } | Self::UnsupportedType(_))
    }
}

impl From<AppError> for UploadError {
    fn from(err: AppError) -> Self {
        match err.kind {
            ErrorKind::Authentication | ErrorKind::Authorization => {
                Self::Unauthenticated(err.message)
            }
            ErrorKind::ExternalService | ErrorKind::Timeout | ErrorKind::NotFound => {
                Self::NetworkError(err.message)
            }
            ErrorKind::Validation
            | ErrorKind::Storage
            | ErrorKind::Internal
            | ErrorKind::Configuration
            | ErrorKind::Serialization => Self::BackendRejected(err.message),
        }
    }
}

/// File contents plus the metadata captured when the upload was requested.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    /// Original file name.
    pub file_name: String,
    /// Declared content type.
    pub mime_type: String,
    /// File contents.
    pub data: Bytes,
}

impl UploadPayload {
    /// Create a payload.
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where an upload goes and how it is cataloged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Destination key in the object store.
    pub storage_key: String,
    /// Book namespace recorded in the catalog.
    pub book_id: Option<String>,
    /// Asset classification recorded in the catalog.
    pub asset_type: AssetType,
}

/// Successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Public URL of the stored object.
    pub url: String,
    /// Key the object was stored under.
    pub storage_key: String,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// Content type the object was stored with.
    pub content_type: String,
}

/// Uploads single files to an [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct AssetUploadClient {
    store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn AssetCatalog>>,
    config: UploadConfig,
}

impl AssetUploadClient {
    /// Create a client writing to `store` under the limits in `config`.
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self {
            store,
            catalog: None,
            config,
        }
    }

    /// Record metadata for every successful upload in `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<dyn AssetCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Upload limits in effect.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// The backing object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Check the preconditions that make an upload permanently impossible.
    pub fn validate(&self, size: u64, mime_type: &str) -> Result<(), UploadError> {
        if size > self.config.max_file_size_bytes {
            return Err(UploadError::FileTooLarge {
                size,
                max: self.config.max_file_size_bytes,
            });
        }
        if !self.config.is_allowed_mime(mime_type) {
            return Err(UploadError::UnsupportedType(mime_type.to_string()));
        }
        Ok(())
    }

    /// Upload `file` under a freshly generated key in the shared namespace.
    ///
    /// Intended for one-shot flows that do not need the background manager.
    pub async fn upload_shared<F>(
        &self,
        file: &UploadPayload,
        on_progress: F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let asset_type = AssetType::from_mime(&file.mime_type);
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let storage_key = keys::destination_key(
            KeyScope {
                asset_type,
                ..KeyScope::default()
            },
            &unique,
            &file.file_name,
        );
        self.upload(file, &storage_key, on_progress).await
    }

    /// Upload `file` to `destination_key`.
    ///
    /// `on_progress` receives non-decreasing percentages in `[0, 100]`.
    pub async fn upload<F>(
        &self,
        file: &UploadPayload,
        destination_key: &str,
        on_progress: F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let target = UploadTarget {
            storage_key: destination_key.to_string(),
            book_id: None,
            asset_type: AssetType::from_mime(&file.mime_type),
        };
        self.upload_to(file, &target, on_progress).await
    }

    /// Upload `file` to `target`, recording the target's book and asset type.
    pub async fn upload_to<F>(
        &self,
        file: &UploadPayload,
        target: &UploadTarget,
        on_progress: F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let size = file.size();
        self.validate(size, &file.mime_type)?;

        let deadline = self.config.timeout_for(size);
        let progress = monotonic_percent(on_progress);

        debug!(
            key = %target.storage_key,
            size,
            timeout_secs = deadline.as_secs(),
            "Starting upload"
        );

        let put = self.store.put_object(
            &target.storage_key,
            file.data.clone(),
            &file.mime_type,
            progress,
        );
        let output = match tokio::time::timeout(deadline, put).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(key = %target.storage_key, error = %e, "Upload failed");
                return Err(UploadError::from(e));
            }
            Err(_) => {
                warn!(key = %target.storage_key, ?deadline, "Upload timed out");
                return Err(UploadError::Timeout(deadline));
            }
        };

        if let Some(catalog) = &self.catalog {
            let record = AssetRecord {
                storage_key: target.storage_key.clone(),
                url: output.public_url.clone(),
                file_name: file.file_name.clone(),
                mime_type: file.mime_type.clone(),
                size_bytes: size,
                book_id: target.book_id.clone(),
                asset_type: target.asset_type,
                uploaded_at: chrono::Utc::now(),
            };
            if let Err(e) = catalog.record(&record).await {
                warn!(
                    key = %target.storage_key,
                    error = %e,
                    "Failed to record asset metadata; upload kept"
                );
            }
        }

        info!(key = %target.storage_key, size, url = %output.public_url, "Upload complete");
        Ok(UploadOutcome {
            url: output.public_url,
            storage_key: target.storage_key.clone(),
            size_bytes: size,
            content_type: file.mime_type.clone(),
        })
    }
}

/// Adapt a percentage callback into a byte-level [`TransferProgress`] that
/// never reports a value lower than one already reported.
fn monotonic_percent<F>(on_progress: F) -> TransferProgress
where
    F: Fn(f64) + Send + Sync + 'static,
{
    let last = Mutex::new(-1.0_f64);
    Arc::new(move |sent: u64, total: u64| {
        let percent = if total == 0 {
            if sent == 0 { 0.0 } else { 100.0 }
        } else {
            (sent.min(total) as f64 / total as f64) * 100.0
        };
        let Ok(mut highest) = last.lock() else {
            return;
        };
        if percent > *highest {
            *highest = percent;
            on_progress(percent);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use bookshelf_core::kv::MemoryKvStore;
    use bookshelf_core::result::AppResult;
    use bookshelf_core::traits::storage::PutObjectOutput;

    use super::*;
    use crate::catalog::KvAssetCatalog;
    use crate::providers::LocalObjectStore;

    #[derive(Debug)]
    struct FailingCatalog;

    #[async_trait]
    impl AssetCatalog for FailingCatalog {
        async fn record(&self, _record: &AssetRecord) -> AppResult<()> {
            Err(AppError::storage("catalog offline"))
        }

        async fn get(&self, _storage_key: &str) -> AppResult<Option<AssetRecord>> {
            Ok(None)
        }
    }

    /// Store that never finishes a write.
    #[derive(Debug, Default)]
    struct StalledStore {
        started: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for StalledStore {
        fn provider_type(&self) -> &str {
            "stalled"
        }

        async fn put_object(
            &self,
            _key: &str,
            _data: Bytes,
            _content_type: &str,
            _progress: TransferProgress,
        ) -> AppResult<PutObjectOutput> {
            self.started.store(true, Ordering::SeqCst);
            futures::future::pending().await
        }

        async fn head_object(&self, _key: &str) -> AppResult<bool> {
            Ok(false)
        }

        async fn delete_object(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }
    }

    /// Store that rejects every write with a fixed error.
    #[derive(Debug)]
    struct RejectingStore(AppError);

    #[async_trait]
    impl ObjectStore for RejectingStore {
        fn provider_type(&self) -> &str {
            "rejecting"
        }

        async fn put_object(
            &self,
            _key: &str,
            _data: Bytes,
            _content_type: &str,
            _progress: TransferProgress,
        ) -> AppResult<PutObjectOutput> {
            Err(self.0.clone())
        }

        async fn head_object(&self, _key: &str) -> AppResult<bool> {
            Ok(false)
        }

        async fn delete_object(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }
    }

    async fn local_client(dir: &tempfile::TempDir) -> AssetUploadClient {
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "https://cdn.test")
            .await
            .unwrap()
            .with_chunk_size(1024);
        AssetUploadClient::new(Arc::new(store), UploadConfig::default())
    }

    fn png(len: usize) -> UploadPayload {
        UploadPayload::new("figure.png", "image/png", Bytes::from(vec![7u8; len]))
    }

    #[tokio::test]
    async fn test_upload_reports_monotonic_progress_and_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(MemoryKvStore::new());
        let catalog = Arc::new(KvAssetCatalog::new(kv, "asset:"));
        let client = local_client(&dir).await.with_catalog(catalog.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let outcome = client
            .upload(&png(10_000), "assets/book-1/image/j-figure.png", move |p| {
                sink.lock().unwrap().push(p)
            })
            .await
            .unwrap();

        assert_eq!(outcome.url, "https://cdn.test/assets/book-1/image/j-figure.png");
        assert_eq!(outcome.storage_key, "assets/book-1/image/j-figure.png");
        assert_eq!(outcome.size_bytes, 10_000);

        let seen = seen.lock().unwrap().clone();
        assert!(seen.len() > 2);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.first().copied(), Some(0.0));
        assert_eq!(seen.last().copied(), Some(100.0));

        let record = catalog
            .get("assets/book-1/image/j-figure.png")
            .await
            .unwrap()
            .expect("record written");
        assert_eq!(record.size_bytes, 10_000);
        assert_eq!(record.asset_type, AssetType::Image);
    }

    #[tokio::test]
    async fn test_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap();
        let config = UploadConfig {
            max_file_size_bytes: 100,
            ..UploadConfig::default()
        };
        let client = AssetUploadClient::new(Arc::new(store), config);

        let err = client.upload(&png(101), "k.png", |_| {}).await.unwrap_err();
        assert_eq!(err, UploadError::FileTooLarge { size: 101, max: 100 });
        assert!(!err.is_retryable());
        assert!(!client.store().head_object("k.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_type() {
        let dir = tempfile::tempdir().unwrap();
        let client = local_client(&dir).await;
        let file = UploadPayload::new("x.evil", "text/x-evil", Bytes::new());

        let err = client.upload(&file, "k", |_| {}).await.unwrap_err();
        assert_eq!(err, UploadError::UnsupportedType("text/x-evil".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_catalog_failure_does_not_fail_upload() {
        let dir = tempfile::tempdir().unwrap();
        let client = local_client(&dir)
            .await
            .with_catalog(Arc::new(FailingCatalog));

        let outcome = client.upload(&png(10), "assets/a.png", |_| {}).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_upload_times_out() {
        let store = Arc::new(StalledStore::default());
        let config = UploadConfig {
            timeout_base_seconds: 5,
            timeout_per_mb_seconds: 1,
            ..UploadConfig::default()
        };
        let client = AssetUploadClient::new(store.clone(), config);

        let err = client.upload(&png(10), "k.png", |_| {}).await.unwrap_err();
        assert_eq!(err, UploadError::Timeout(Duration::from_secs(6)));
        assert!(err.is_retryable());
        assert!(store.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_backend_errors_map_to_taxonomy() {
        let cases = [
            (
                AppError::authentication("expired"),
                UploadError::Unauthenticated("expired".to_string()),
            ),
            (
                AppError::external_service("connection reset"),
                UploadError::NetworkError("connection reset".to_string()),
            ),
            (
                AppError::validation("PUT k returned 413"),
                UploadError::BackendRejected("PUT k returned 413".to_string()),
            ),
        ];

        for (backend_error, expected) in cases {
            let client = AssetUploadClient::new(
                Arc::new(RejectingStore(backend_error)),
                UploadConfig::default(),
            );
            let err = client.upload(&png(1), "k.png", |_| {}).await.unwrap_err();
            assert_eq!(err, expected);
            assert!(err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_upload_shared_generates_shared_key() {
        let dir = tempfile::tempdir().unwrap();
        let client = local_client(&dir).await;

        let outcome = client.upload_shared(&png(3), |_| {}).await.unwrap();
        assert!(outcome.storage_key.starts_with("assets/shared/image/"));
        assert!(outcome.storage_key.ends_with("-figure.png"));
        assert!(client.store().head_object(&outcome.storage_key).await.unwrap());
    }
}

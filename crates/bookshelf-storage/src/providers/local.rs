//! Local filesystem object store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_core::result::AppResult;
use bookshelf_core::traits::storage::{ObjectStore, PutObjectOutput, TransferProgress};

/// Object store writing each object to `{root}/{key}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Root directory for all stored objects.
    root: PathBuf,
    /// Base URL objects are served from.
    public_base_url: String,
    /// Write granularity, also the progress reporting granularity.
    chunk_size: usize,
}

impl LocalObjectStore {
    /// Create a new local store rooted at the given path.
    pub async fn new(root_path: &str, public_base_url: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            chunk_size: 65_536,
        })
    }

    /// Override the write chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolve a key to a path inside the root, rejecting traversal.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::validation(format!("Invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_parent(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }
}

/// Sibling file an object is written to before it is renamed into place.
/// Removed on drop unless committed.
struct PartialObject {
    path: PathBuf,
    committed: bool,
}

impl PartialObject {
    fn beside(target: &Path) -> Self {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        Self {
            path: target.with_file_name(format!(".{name}.{}.partial", Uuid::new_v4().simple())),
            committed: false,
        }
    }
}

impl Drop for PartialObject {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial object"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial object")
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
        progress: TransferProgress,
    ) -> AppResult<PutObjectOutput> {
        let full_path = self.resolve(key)?;
        self.ensure_parent(&full_path).await?;

        let mut partial = PartialObject::beside(&full_path);
        let mut file = fs::File::create(&partial.path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create object: {key}"),
                e,
            )
        })?;

        let total = data.len() as u64;
        let mut written = 0u64;
        progress(0, total);
        for chunk in data.chunks(self.chunk_size) {
            file.write_all(chunk).await.map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to write chunk", e)
            })?;
            written += chunk.len() as u64;
            progress(written, total);
        }

        file.flush()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Storage, "Failed to flush object", e))?;
        drop(file);

        fs::rename(&partial.path, &full_path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to commit object: {key}"),
                e,
            )
        })?;
        partial.committed = true;

        debug!(key, bytes = total, "Wrote object");
        Ok(PutObjectOutput {
            public_url: format!("{}/{}", self.public_base_url, key.trim_start_matches('/')),
        })
    }

    async fn head_object(&self, key: &str) -> AppResult<bool> {
        let full_path = self.resolve(key)?;
        Ok(fs::metadata(&full_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        let full_path = self.resolve(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete object: {key}"),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    fn noop() -> TransferProgress {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn test_put_head_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "https://cdn.test/")
            .await
            .unwrap();

        let out = store
            .put_object("assets/b/image/x.png", Bytes::from("png"), "image/png", noop())
            .await
            .unwrap();
        assert_eq!(out.public_url, "https://cdn.test/assets/b/image/x.png");
        assert!(store.head_object("assets/b/image/x.png").await.unwrap());

        store.delete_object("assets/b/image/x.png").await.unwrap();
        assert!(!store.head_object("assets/b/image/x.png").await.unwrap());
        store.delete_object("assets/b/image/x.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_reports_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap()
            .with_chunk_size(4);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .put_object(
                "k.bin",
                Bytes::from_static(b"0123456789"),
                "application/octet-stream",
                Arc::new(move |sent, total| sink.lock().unwrap().push((sent, total))),
            )
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, 10), (4, 10), (8, 10), (10, 10)]
        );
    }

    #[tokio::test]
    async fn test_abandoned_write_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap()
            .with_chunk_size(1);

        let started = Arc::new(Notify::new());
        let signal = Arc::clone(&started);
        let task = tokio::spawn(async move {
            store
                .put_object(
                    "assets/big.bin",
                    Bytes::from(vec![7u8; 200_000]),
                    "application/octet-stream",
                    Arc::new(move |sent, _| {
                        if sent > 0 {
                            signal.notify_one();
                        }
                    }),
                )
                .await
        });

        started.notified().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap();
        assert!(!store.head_object("assets/big.bin").await.unwrap());
        let leftovers = std::fs::read_dir(dir.path().join("assets")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_timed_out_write_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap()
            .with_chunk_size(1);

        let put = store.put_object(
            "assets/slow.bin",
            Bytes::from(vec![1u8; 200_000]),
            "application/octet-stream",
            noop(),
        );
        let outcome = tokio::time::timeout(Duration::from_millis(20), put).await;
        assert!(outcome.is_err());

        assert!(!store.head_object("assets/slow.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_whole_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap();

        store
            .put_object("k.txt", Bytes::from_static(b"first version"), "text/plain", noop())
            .await
            .unwrap();
        store
            .put_object("k.txt", Bytes::from_static(b"second"), "text/plain", noop())
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("k.txt")).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_str().unwrap(), "http://x")
            .await
            .unwrap();
        let err = store
            .put_object("../escape.txt", Bytes::new(), "text/plain", noop())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}

//! Object storage trait for pluggable asset backends.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::result::AppResult;

/// Callback receiving `(bytes_sent, total_bytes)` while an object is written.
///
/// Implementations call it with non-decreasing `bytes_sent`.
pub type TransferProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Result of a successful `put_object`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PutObjectOutput {
    /// Publicly reachable URL of the stored object.
    pub public_url: String,
}

/// Trait for remote object storage backends.
///
/// Implementations exist for an HTTPS bucket API and the local filesystem.
/// The [`ObjectStore`] trait is defined here in `bookshelf-core` and
/// implemented in `bookshelf-storage`.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the backend type name (e.g., "local", "http").
    fn provider_type(&self) -> &str;

    /// Write `data` under `key`, reporting progress as bytes are sent.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: TransferProgress,
    ) -> AppResult<PutObjectOutput>;

    /// Check whether an object exists under `key`.
    async fn head_object(&self, key: &str) -> AppResult<bool>;

    /// Delete the object under `key`. Deleting a missing object succeeds.
    async fn delete_object(&self, key: &str) -> AppResult<()>;
}

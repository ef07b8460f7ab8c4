//! Asset metadata catalog.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::AssetRecord;

/// Stores the metadata record written after each successful upload.
#[async_trait]
pub trait AssetCatalog: Send + Sync + std::fmt::Debug + 'static {
    /// Persist `record`, replacing any record for the same storage key.
    async fn record(&self, record: &AssetRecord) -> AppResult<()>;

    /// Look up the record for `storage_key`.
    async fn get(&self, storage_key: &str) -> AppResult<Option<AssetRecord>>;
}

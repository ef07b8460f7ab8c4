//! Asset catalog backed by the local key-value store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use bookshelf_core::result::AppResult;
use bookshelf_core::traits::{AssetCatalog, KeyValueStore};
use bookshelf_core::types::AssetRecord;

/// Stores each [`AssetRecord`] as JSON under `{prefix}{storage_key}`.
#[derive(Debug, Clone)]
pub struct KvAssetCatalog {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl KvAssetCatalog {
    /// Create a catalog writing to `store` under `prefix`.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn entry_key(&self, storage_key: &str) -> String {
        format!("{}{}", self.prefix, storage_key)
    }

    /// All records in the catalog, ordered by storage key.
    pub fn list(&self) -> AppResult<Vec<AssetRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(&self.prefix)? {
            if let Some(raw) = self.store.get(&key)? {
                records.push(serde_json::from_str(&raw)?);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AssetCatalog for KvAssetCatalog {
    async fn record(&self, record: &AssetRecord) -> AppResult<()> {
        let json = serde_json::to_string(record)?;
        self.store.set(&self.entry_key(&record.storage_key), &json)?;
        debug!(storage_key = %record.storage_key, "Recorded asset metadata");
        Ok(())
    }

    async fn get(&self, storage_key: &str) -> AppResult<Option<AssetRecord>> {
        match self.store.get(&self.entry_key(storage_key))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

//! Local key-value persistence configuration.

use serde::{Deserialize, Serialize};

/// Where and under which keys local state is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the JSON document backing the key-value store.
    #[serde(default = "default_path")]
    pub path: String,
    /// Key holding the upload manager snapshot.
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,
    /// Key holding the book registry (`[{"id": .., "name": ..}]`).
    #[serde(default = "default_registry_key")]
    pub registry_key: String,
    /// Prefix for asset metadata records.
    #[serde(default = "default_catalog_prefix")]
    pub catalog_prefix: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            snapshot_key: default_snapshot_key(),
            registry_key: default_registry_key(),
            catalog_prefix: default_catalog_prefix(),
        }
    }
}

fn default_path() -> String {
    "./data/bookshelf-state.json".to_string()
}

fn default_snapshot_key() -> String {
    "bookshelf.upload-jobs".to_string()
}

fn default_registry_key() -> String {
    "books".to_string()
}

fn default_catalog_prefix() -> String {
    "asset:".to_string()
}

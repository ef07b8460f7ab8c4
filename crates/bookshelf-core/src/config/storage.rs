//! Object storage configuration.

use serde::{Deserialize, Serialize};

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use: `"local"` or `"http"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL prepended to storage keys to form public URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Local filesystem backend configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
    /// HTTPS object storage backend configuration.
    #[serde(default)]
    pub http: HttpStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            public_base_url: default_public_base_url(),
            local: LocalStorageConfig::default(),
            http: HttpStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    /// Root path for stored objects.
    #[serde(default = "default_local_root")]
    pub root_path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_path: default_local_root(),
        }
    }
}

/// HTTPS object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStorageConfig {
    /// Storage endpoint, e.g. `https://project.storage.example.com`.
    #[serde(default)]
    pub endpoint: String,
    /// Bucket holding uploaded assets.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Bearer token used to authenticate requests. Usually supplied via
    /// `BOOKSHELF__STORAGE__HTTP__ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: String,
    /// Size of each streamed body chunk in bytes (default 64 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: default_bucket(),
            access_token: String::new(),
            chunk_size_bytes: default_chunk_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/assets".to_string()
}

fn default_local_root() -> String {
    "./data/objects".to_string()
}

fn default_bucket() -> String {
    "bookshelf-assets".to_string()
}

fn default_chunk_size() -> usize {
    65_536 // 64 KiB
}

fn default_connect_timeout() -> u64 {
    10
}

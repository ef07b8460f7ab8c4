//! Application configuration schemas.
//!
//! All configuration structs are deserialized from a TOML file via the
//! `config` crate, overlaid with `BOOKSHELF__`-prefixed environment
//! variables. Each sub-module represents a logical configuration section,
//! and every field has a default so an empty file is a valid configuration.

pub mod logging;
pub mod persistence;
pub mod storage;
pub mod upload;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::persistence::PersistenceConfig;
pub use self::storage::StorageConfig;
pub use self::upload::UploadConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload client and manager settings.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Local key-value persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// The file is optional. Environment variables prefixed with
    /// `BOOKSHELF` and using `__` as the section separator override file
    /// values, e.g. `BOOKSHELF__UPLOAD__MAX_CONCURRENT_UPLOADS=2`.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("BOOKSHELF")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

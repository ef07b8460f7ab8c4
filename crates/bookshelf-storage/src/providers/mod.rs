//! Object store implementations.

#[cfg(feature = "http")]
pub mod http;
pub mod local;

use std::sync::Arc;

use bookshelf_core::config::StorageConfig;
use bookshelf_core::error::AppError;
use bookshelf_core::result::AppResult;
use bookshelf_core::traits::{AuthProvider, ObjectStore};

#[cfg(feature = "http")]
pub use http::HttpObjectStore;
pub use local::LocalObjectStore;

/// Build the object store selected by `config.provider`.
#[cfg_attr(not(feature = "http"), allow(unused_variables))]
pub async fn from_config(
    config: &StorageConfig,
    auth: Arc<dyn AuthProvider>,
) -> AppResult<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "local" => {
            let store =
                LocalObjectStore::new(&config.local.root_path, &config.public_base_url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "http")]
        "http" => {
            let store = HttpObjectStore::new(&config.http, &config.public_base_url, auth)?;
            Ok(Arc::new(store))
        }
        other => Err(AppError::configuration(format!(
            "Unknown storage provider '{other}'"
        ))),
    }
}

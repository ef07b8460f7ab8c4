//! # bookshelf-storage
//!
//! Object storage backends (HTTPS bucket API, local filesystem) and the
//! asset upload client that validates, uploads, and catalogs one file.

pub mod auth;
pub mod catalog;
pub mod keys;
pub mod providers;
pub mod upload;

pub use auth::StaticTokenAuth;
pub use catalog::KvAssetCatalog;
pub use upload::{AssetUploadClient, UploadError, UploadOutcome, UploadPayload, UploadTarget};

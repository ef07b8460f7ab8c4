//! Core traits defined in `bookshelf-core` and implemented by other crates.

pub mod auth;
pub mod catalog;
pub mod kv;
pub mod registry;
pub mod storage;

pub use auth::AuthProvider;
pub use catalog::AssetCatalog;
pub use kv::KeyValueStore;
pub use registry::{BookEntry, BookRegistry};
pub use storage::{ObjectStore, PutObjectOutput, TransferProgress};

//! Core type definitions used across the Bookshelf workspace.

pub mod asset;
pub mod id;

pub use asset::{AssetRecord, AssetType};
pub use id::JobId;

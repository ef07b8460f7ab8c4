//! # bookshelf-core
//!
//! Core crate for the Bookshelf asset pipeline. Contains the traits the
//! upload stack is written against (object storage, authentication, book
//! registry, asset catalog, key-value persistence), configuration schemas,
//! typed identifiers, book identity resolution, and the unified error
//! system.
//!
//! This crate has **no** internal dependencies on other Bookshelf crates.

pub mod config;
pub mod error;
pub mod identity;
pub mod kv;
pub mod registry;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use identity::{BookIdentity, IdentityResolver};
pub use result::AppResult;

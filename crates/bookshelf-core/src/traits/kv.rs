//! Synchronous string key-value persistence.

use crate::result::AppResult;

/// A small synchronous key-value store for local application state.
///
/// Used by the book registry, the asset catalog, and the upload manager's
/// best-effort snapshot. Writes are expected to be cheap and infrequent.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug + 'static {
    /// Read the value under `key`.
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> AppResult<()>;

    /// Remove `key`. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> AppResult<()>;

    /// List keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}

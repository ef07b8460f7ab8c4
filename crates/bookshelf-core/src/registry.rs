//! [`BookRegistry`] implementations.

use std::sync::Arc;

use crate::result::AppResult;
use crate::traits::{BookEntry, BookRegistry, KeyValueStore};

/// Registry read from a JSON array stored in a key-value store.
///
/// The array is maintained by the book-management side of the application;
/// this type only reads it. A missing key means no books are registered.
#[derive(Debug, Clone)]
pub struct KvBookRegistry {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl KvBookRegistry {
    /// Create a registry reading `key` from `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl BookRegistry for KvBookRegistry {
    fn list_books(&self) -> AppResult<Vec<BookEntry>> {
        match self.store.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

/// Fixed, in-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticBookRegistry {
    books: Vec<BookEntry>,
}

impl StaticBookRegistry {
    /// Create a registry over `books`.
    pub fn new(books: Vec<BookEntry>) -> Self {
        Self { books }
    }
}

impl BookRegistry for StaticBookRegistry {
    fn list_books(&self) -> AppResult<Vec<BookEntry>> {
        Ok(self.books.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[test]
    fn test_kv_registry_reads_json_array() {
        let store = Arc::new(MemoryKvStore::new());
        store
            .set("books", r#"[{"id":"bk-1","name":"Physics"}]"#)
            .unwrap();
        let registry = KvBookRegistry::new(store, "books");

        let books = registry.list_books().unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, "bk-1");
    }

    #[test]
    fn test_kv_registry_missing_key_is_empty() {
        let registry = KvBookRegistry::new(Arc::new(MemoryKvStore::new()), "books");
        assert!(registry.list_books().unwrap().is_empty());
    }
}

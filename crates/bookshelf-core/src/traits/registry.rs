//! Read-only book registry.

use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// A book known to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    /// Registry identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Source of known books, maintained by the book-management side of the app.
pub trait BookRegistry: Send + Sync + std::fmt::Debug + 'static {
    /// All registered books.
    fn list_books(&self) -> AppResult<Vec<BookEntry>>;
}

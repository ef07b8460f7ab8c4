//! Book identity resolution.
//!
//! Uploaded assets are namespaced by book rather than by user so they stay
//! shareable after a paper is exported and imported elsewhere. A book name
//! resolves to its registry id when the book is known locally; otherwise to
//! an id derived only from the normalized name, so independent clients agree
//! on the namespace without talking to each other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::traits::BookRegistry;

/// Namespace for name-derived book ids. Changing it would move every asset
/// uploaded under an unregistered book name.
const BOOK_NAMESPACE: Uuid = Uuid::from_u128(0x6b2f_93a1_4c5e_4d0b_9e61_2a7c_d3f8_1b45);

/// Prefix of name-derived ids.
const DERIVED_PREFIX: &str = "book-";

/// Outcome of resolving a book name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookIdentity {
    /// Namespace key for the book's assets.
    pub book_id: String,
    /// Whether the id came from the registry.
    pub is_known: bool,
}

/// Resolves book names to stable ids.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    registry: Arc<dyn BookRegistry>,
}

impl IdentityResolver {
    /// Create a resolver backed by `registry`.
    pub fn new(registry: Arc<dyn BookRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `name` to a book id. Never fails: a registry that cannot be
    /// read is treated as having no match.
    pub fn resolve_book_id(&self, name: &str) -> BookIdentity {
        let normalized = normalize_name(name);

        match self.registry.list_books() {
            Ok(books) => {
                if let Some(book) = books
                    .into_iter()
                    .find(|book| normalize_name(&book.name) == normalized)
                {
                    return BookIdentity {
                        book_id: book.id,
                        is_known: true,
                    };
                }
            }
            Err(e) => {
                warn!(error = %e, "Book registry unavailable, falling back to derived id");
            }
        }

        BookIdentity {
            book_id: derive_id(&normalized),
            is_known: false,
        }
    }
}

/// Trim, collapse runs of whitespace to one space, and lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic id for `name`: `book-` followed by 32 lowercase hex digits.
///
/// Two names map to the same id exactly when they normalize equally, as
/// defined by [`normalize_name`]. Besides case and surrounding whitespace,
/// that also ignores the length of internal whitespace runs, so
/// `"Algebra  II"` and `"Algebra II"` share an id.
pub fn deterministic_id(name: &str) -> String {
    derive_id(&normalize_name(name))
}

fn derive_id(normalized: &str) -> String {
    let digest = Uuid::new_v5(&BOOK_NAMESPACE, normalized.as_bytes());
    format!("{DERIVED_PREFIX}{}", digest.simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticBookRegistry;
    use crate::traits::BookEntry;

    fn empty_resolver() -> IdentityResolver {
        IdentityResolver::new(Arc::new(StaticBookRegistry::default()))
    }

    #[test]
    fn test_unknown_name_is_stable_across_resolvers() {
        let first = empty_resolver().resolve_book_id("Algebra II");
        let second = empty_resolver().resolve_book_id("Algebra II");
        assert_eq!(first, second);
        assert!(!first.is_known);
    }

    #[test]
    fn test_case_and_whitespace_variants_agree() {
        let resolver = empty_resolver();
        let a = resolver.resolve_book_id("Algebra II");
        let b = resolver.resolve_book_id("  algebra   ii ");
        assert_eq!(a.book_id, b.book_id);
    }

    #[test]
    fn test_internal_whitespace_runs_share_an_id() {
        assert_eq!(normalize_name("Algebra \t II"), "algebra ii");
        assert_eq!(deterministic_id("Algebra  II"), deterministic_id("Algebra II"));
        assert_ne!(deterministic_id("AlgebraII"), deterministic_id("Algebra II"));
    }

    #[test]
    fn test_different_names_differ() {
        assert_ne!(deterministic_id("Algebra I"), deterministic_id("Algebra II"));
    }

    #[test]
    fn test_derived_id_is_path_safe() {
        let id = deterministic_id("Física / Química: 第一章 ../../etc");
        assert_eq!(id.len(), 37);
        assert!(id.starts_with("book-"));
        assert!(
            id.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        );
    }

    #[test]
    fn test_registry_match_wins() {
        let registry = StaticBookRegistry::new(vec![BookEntry {
            id: "bk-42".to_string(),
            name: "Organic Chemistry".to_string(),
        }]);
        let resolver = IdentityResolver::new(Arc::new(registry));

        let identity = resolver.resolve_book_id("organic chemistry ");
        assert_eq!(
            identity,
            BookIdentity {
                book_id: "bk-42".to_string(),
                is_known: true,
            }
        );
    }
}

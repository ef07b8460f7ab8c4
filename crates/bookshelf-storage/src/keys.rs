//! Storage key layout for uploaded assets.
//!
//! Book-scoped assets live under `assets/{book_id}/{asset_type}/` with an
//! optional chapter segment; everything else under `assets/shared/`. Every
//! segment is sanitized so keys are safe as URL paths and filesystem paths.

use bookshelf_core::types::AssetType;

/// Root prefix of all asset keys.
pub const ASSET_ROOT: &str = "assets";

/// Namespace used when an upload has no book.
pub const SHARED_NAMESPACE: &str = "shared";

const MAX_SEGMENT_LEN: usize = 64;
const MAX_FILE_NAME_LEN: usize = 96;

/// Where in the key space an asset belongs.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyScope<'a> {
    /// Resolved book id.
    pub book_id: Option<&'a str>,
    /// Chapter inside the book.
    pub chapter_id: Option<&'a str>,
    /// Asset classification.
    pub asset_type: AssetType,
}

/// Build the destination key for `file_name`.
///
/// `unique` distinguishes uploads of equally named files; the background
/// manager passes the job id so retries overwrite the same object.
pub fn destination_key(scope: KeyScope<'_>, unique: &str, file_name: &str) -> String {
    let namespace = scope
        .book_id
        .map(|id| sanitize(id, MAX_SEGMENT_LEN))
        .unwrap_or_else(|| SHARED_NAMESPACE.to_string());

    let mut key = format!("{ASSET_ROOT}/{namespace}/{}", scope.asset_type.as_str());
    if let Some(chapter) = scope.chapter_id.filter(|c| !c.trim().is_empty()) {
        key.push('/');
        key.push_str(&sanitize(chapter, MAX_SEGMENT_LEN));
    }
    key.push('/');
    key.push_str(&sanitize(unique, MAX_SEGMENT_LEN));
    key.push('-');
    key.push_str(&sanitize(file_name, MAX_FILE_NAME_LEN));
    key
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`, strip leading dots,
/// squeeze repeated dots, and cap the length. Never returns an empty string.
pub fn sanitize(segment: &str, max_len: usize) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut cleaned = cleaned.trim_start_matches('.').to_string();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let bounded: String = cleaned.chars().take(max_len).collect();
    if bounded.is_empty() {
        "file".to_string()
    } else {
        bounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_scoped_key_with_chapter() {
        let key = destination_key(
            KeyScope {
                book_id: Some("book-0123"),
                chapter_id: Some("ch 3"),
                asset_type: AssetType::Image,
            },
            "job1",
            "diagram one.png",
        );
        assert_eq!(key, "assets/book-0123/image/ch_3/job1-diagram_one.png");
    }

    #[test]
    fn test_unscoped_key_uses_shared_namespace() {
        let key = destination_key(KeyScope::default(), "u", "notes.pdf");
        assert_eq!(key, "assets/shared/attachment/u-notes.pdf");
    }

    #[test]
    fn test_traversal_is_neutralized() {
        let key = destination_key(
            KeyScope {
                book_id: Some("../../etc"),
                chapter_id: None,
                asset_type: AssetType::Pdf,
            },
            "u",
            "../passwd",
        );
        assert!(!key.contains(".."));
        assert!(
            key.split('/')
                .all(|segment| !segment.is_empty() && !segment.starts_with('.'))
        );
    }

    #[test]
    fn test_sanitize_bounds_length_and_handles_empty() {
        assert_eq!(sanitize("", 10), "file");
        assert_eq!(sanitize("日本語", 10), "___");
        assert_eq!(sanitize(&"a".repeat(200), 10).len(), 10);
    }
}

//! Migration of assets embedded in legacy documents.
//!
//! Older documents carried images inline as `data:` URIs, or as `blob:` URLs
//! that only meant something inside the browser session that created them.
//! The migrator finds both, uploads the inline ones through the manager, and
//! rewrites each reference to its stored URL.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use bookshelf_core::types::{AssetType, JobId};
use bookshelf_storage::upload::UploadPayload;

use crate::job::{JobMetadata, JobStatus, UploadScope};
use crate::manager::UploadManager;

/// What kind of legacy reference was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Inline `data:` URI.
    DataUri {
        /// Declared media type, `text/plain` when omitted.
        mime_type: String,
    },
    /// Browser-session `blob:` URL.
    BlobUrl,
}

/// A legacy reference and where it sits in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyReference {
    /// JSON pointer (RFC 6901) to the string value.
    pub pointer: String,
    /// Reference kind.
    #[serde(flatten)]
    pub kind: ReferenceKind,
}

/// A reference that was uploaded and rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigratedAsset {
    pub pointer: String,
    pub job_id: JobId,
    pub url: String,
}

/// A reference left untouched, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAsset {
    pub pointer: String,
    pub reason: String,
}

/// Outcome of migrating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Uploaded and rewritten.
    pub migrated: Vec<MigratedAsset>,
    /// Decoded but the upload did not complete.
    pub failed: Vec<SkippedAsset>,
    /// `blob:` URLs; their bytes are not reachable from here.
    pub unresolvable: Vec<SkippedAsset>,
    /// `data:` URIs that could not be decoded.
    pub invalid: Vec<SkippedAsset>,
}

impl MigrationReport {
    /// Whether every reference was migrated.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unresolvable.is_empty() && self.invalid.is_empty()
    }
}

/// Find every `data:` URI and `blob:` URL string in `document`.
pub fn scan(document: &Value) -> Vec<LegacyReference> {
    let mut found = Vec::new();
    walk(document, &mut String::new(), &mut found);
    found
}

fn walk(value: &Value, pointer: &mut String, found: &mut Vec<LegacyReference>) {
    match value {
        Value::String(text) => {
            if let Some(kind) = classify(text) {
                found.push(LegacyReference {
                    pointer: pointer.clone(),
                    kind,
                });
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&index.to_string());
                walk(item, pointer, found);
                pointer.truncate(len);
            }
        }
        Value::Object(fields) => {
            for (key, item) in fields {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                walk(item, pointer, found);
                pointer.truncate(len);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn classify(text: &str) -> Option<ReferenceKind> {
    let head = text.get(..5)?;
    if head.eq_ignore_ascii_case("data:") {
        let header = text[5..].split(',').next().unwrap_or_default();
        let mime_type = media_type(header);
        return Some(ReferenceKind::DataUri { mime_type });
    }
    if head.eq_ignore_ascii_case("blob:") {
        return Some(ReferenceKind::BlobUrl);
    }
    None
}

fn media_type(header: &str) -> String {
    let essence = header.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        "text/plain".to_string()
    } else {
        essence.to_ascii_lowercase()
    }
}

/// Decode a base64 `data:` URI into its media type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Bytes), String> {
    let rest = uri
        .get(..5)
        .filter(|head| head.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
        .ok_or_else(|| "not a data URI".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "missing ',' separator".to_string())?;

    if !header
        .split(';')
        .skip(1)
        .any(|param| param.trim().eq_ignore_ascii_case("base64"))
    {
        return Err("only base64 data URIs are supported".to_string());
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .map_err(|e| format!("invalid base64 payload: {e}"))?;

    Ok((media_type(header), Bytes::from(bytes)))
}

/// File name for the `index`th inline asset of a document.
fn file_name_for(index: usize, mime_type: &str) -> String {
    let extension = mime_guess::get_mime_extensions_str(mime_type)
        .and_then(|extensions| extensions.first())
        .copied()
        .unwrap_or("bin");
    format!("inline-{}.{extension}", index + 1)
}

/// Uploads inline assets of legacy documents through the manager.
#[derive(Debug, Clone)]
pub struct LegacyAssetMigrator {
    manager: UploadManager,
}

impl LegacyAssetMigrator {
    pub fn new(manager: UploadManager) -> Self {
        Self { manager }
    }

    /// Upload every decodable `data:` URI in `document` and replace it with
    /// the stored URL. Other references are reported and left as they are.
    ///
    /// All uploads are queued first and then awaited, so they share the
    /// manager's concurrency.
    pub async fn migrate(
        &self,
        document: &mut Value,
        scope: Option<UploadScope>,
    ) -> MigrationReport {
        let mut report = MigrationReport::default();
        let mut submitted: Vec<(String, JobId)> = Vec::new();

        for (index, reference) in scan(document).into_iter().enumerate() {
            if reference.kind == ReferenceKind::BlobUrl {
                report.unresolvable.push(SkippedAsset {
                    pointer: reference.pointer,
                    reason: "blob: URLs are only valid in the session that created them"
                        .to_string(),
                });
                continue;
            }

            let uri = document
                .pointer(&reference.pointer)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let (mime_type, data) = match decode_data_uri(uri) {
                Ok(decoded) => decoded,
                Err(reason) => {
                    warn!(pointer = %reference.pointer, %reason, "Skipping undecodable data URI");
                    report.invalid.push(SkippedAsset {
                        pointer: reference.pointer,
                        reason,
                    });
                    continue;
                }
            };

            let mut job_scope = scope.clone().unwrap_or_default();
            job_scope.asset_type = AssetType::from_mime(&mime_type);
            let payload = UploadPayload::new(file_name_for(index, &mime_type), mime_type, data);
            let metadata = JobMetadata::labeled("Embedded asset")
                .with_detail("pointer", reference.pointer.clone());

            let job_id = self.manager.add_upload(payload, Some(job_scope), metadata);
            submitted.push((reference.pointer, job_id));
        }

        for (pointer, job_id) in submitted {
            let job = self.manager.wait_for(job_id).await;
            match job.map(|job| job.status) {
                Some(JobStatus::Completed { result }) => {
                    if let Some(slot) = document.pointer_mut(&pointer) {
                        *slot = Value::String(result.url.clone());
                    }
                    report.migrated.push(MigratedAsset {
                        pointer,
                        job_id,
                        url: result.url,
                    });
                }
                Some(JobStatus::Failed { error }) => report.failed.push(SkippedAsset {
                    pointer,
                    reason: error.message,
                }),
                Some(other) => report.failed.push(SkippedAsset {
                    pointer,
                    reason: format!("upload stopped while {other}"),
                }),
                None => report.failed.push(SkippedAsset {
                    pointer,
                    reason: "upload job was removed before it finished".to_string(),
                }),
            }
        }

        info!(
            migrated = report.migrated.len(),
            failed = report.failed.len(),
            unresolvable = report.unresolvable.len(),
            invalid = report.invalid.len(),
            "Legacy asset migration finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scan_reports_pointers() {
        let document = json!({
            "title": "Atlas",
            "blocks": [
                {"type": "image", "src": "data:image/png;base64,iVBORw0KGgo="},
                {"type": "image", "src": "blob:https://app.example/1f2e"},
                {"type": "text", "body": "data is fine here"}
            ],
            "a/b": {"~x": "DATA:;base64,aGk="}
        });

        let found = scan(&document);
        assert_eq!(
            found,
            vec![
                LegacyReference {
                    pointer: "/a~1b/~0x".to_string(),
                    kind: ReferenceKind::DataUri {
                        mime_type: "text/plain".to_string()
                    },
                },
                LegacyReference {
                    pointer: "/blocks/0/src".to_string(),
                    kind: ReferenceKind::DataUri {
                        mime_type: "image/png".to_string()
                    },
                },
                LegacyReference {
                    pointer: "/blocks/1/src".to_string(),
                    kind: ReferenceKind::BlobUrl,
                },
            ]
        );
        for reference in &found {
            assert!(document.pointer(&reference.pointer).is_some());
        }
    }

    #[test]
    fn test_decode_data_uri() {
        let (mime, bytes) = decode_data_uri("data:text/plain;charset=utf-8;base64,aGVs\nbG8=").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(&bytes[..], b"hello");

        let (_, bytes) = decode_data_uri("data:image/png;base64,aGk").unwrap();
        assert_eq!(&bytes[..], b"hi");
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_data_uri("data:image/png,rawbytes").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/png;base64,***").is_err());
        assert!(decode_data_uri("blob:x").is_err());
    }

    #[test]
    fn test_file_name_uses_known_extension() {
        assert_eq!(file_name_for(0, "application/pdf"), "inline-1.pdf");
        assert_eq!(file_name_for(2, "application/x-unknown"), "inline-3.bin");
    }
}

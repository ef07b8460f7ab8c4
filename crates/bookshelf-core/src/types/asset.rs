//! Asset classification and the metadata record kept for each upload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of asset being uploaded. Used as a path segment in storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Question or answer images.
    Image,
    /// Scanned papers and handouts.
    Pdf,
    /// Listening-comprehension audio.
    Audio,
    /// Lecture recordings.
    Video,
    /// Any other attachment.
    #[default]
    Attachment,
}

impl AssetType {
    /// Stable lowercase name used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Attachment => "attachment",
        }
    }

    /// Classify a MIME type.
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime == "application/pdf" {
            Self::Pdf
        } else {
            Self::Attachment
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata record written to the asset catalog after a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Key of the object in storage.
    pub storage_key: String,
    /// Public URL of the object.
    pub url: String,
    /// Original file name.
    pub file_name: String,
    /// Content type the object was stored with.
    pub mime_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Book namespace, if the upload was book-scoped.
    pub book_id: Option<String>,
    /// Asset classification.
    pub asset_type: AssetType,
    /// When the upload finished.
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mime() {
        assert_eq!(AssetType::from_mime("image/png"), AssetType::Image);
        assert_eq!(AssetType::from_mime("Audio/MPEG"), AssetType::Audio);
        assert_eq!(AssetType::from_mime("application/pdf"), AssetType::Pdf);
        assert_eq!(AssetType::from_mime("text/plain"), AssetType::Attachment);
    }
}

//! Upload client and background manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upload limits, timeouts, and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Number of uploads the background manager runs at once.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_uploads: usize,
    /// Largest accepted file in bytes (default 50 MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// MIME types accepted by the upload client.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Fixed part of the per-upload timeout, in seconds.
    #[serde(default = "default_timeout_base")]
    pub timeout_base_seconds: u64,
    /// Additional timeout granted per started MiB of payload, in seconds.
    #[serde(default = "default_timeout_per_mb")]
    pub timeout_per_mb_seconds: u64,
}

impl UploadConfig {
    /// Timeout for a payload of `size_bytes`, growing with every started MiB.
    pub fn timeout_for(&self, size_bytes: u64) -> Duration {
        let megabytes = size_bytes.div_ceil(1_048_576);
        Duration::from_secs(
            self.timeout_base_seconds
                .saturating_add(self.timeout_per_mb_seconds.saturating_mul(megabytes)),
        )
    }

    /// Whether `mime_type` is on the allow-list. Parameters such as
    /// `; charset=utf-8` are ignored and matching is case-insensitive.
    pub fn is_allowed_mime(&self, mime_type: &str) -> bool {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_concurrency(),
            max_file_size_bytes: default_max_file_size(),
            allowed_mime_types: default_allowed_mime_types(),
            timeout_base_seconds: default_timeout_base(),
            timeout_per_mb_seconds: default_timeout_per_mb(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}

fn default_max_file_size() -> u64 {
    52_428_800 // 50 MB
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
        "image/svg+xml",
        "application/pdf",
        "audio/mpeg",
        "audio/wav",
        "video/mp4",
        "application/json",
        "text/plain",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_timeout_base() -> u64 {
    30
}

fn default_timeout_per_mb() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_scales_with_size() {
        let config = UploadConfig::default();
        assert_eq!(config.timeout_for(0), Duration::from_secs(30));
        assert_eq!(config.timeout_for(1), Duration::from_secs(40));
        assert_eq!(config.timeout_for(2 * 1_048_576), Duration::from_secs(50));
        assert_eq!(config.timeout_for(2 * 1_048_576 + 1), Duration::from_secs(60));
    }

    #[test]
    fn test_mime_allow_list_ignores_parameters_and_case() {
        let config = UploadConfig::default();
        assert!(config.is_allowed_mime("image/PNG"));
        assert!(config.is_allowed_mime("text/plain; charset=utf-8"));
        assert!(!config.is_allowed_mime("text/x-evil"));
        assert!(!config.is_allowed_mime(""));
    }
}

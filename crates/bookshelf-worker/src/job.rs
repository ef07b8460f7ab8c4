//! Upload job model.
//!
//! A job's status is a tagged union: the upload result exists only on
//! `Completed` and the error only on `Failed`, so neither can be present in
//! any other state.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bookshelf_core::types::{AssetType, JobId};
use bookshelf_storage::upload::{UploadError, UploadOutcome, UploadPayload};

/// Result stored on a completed job.
pub type UploadResult = UploadOutcome;

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Transfer in progress.
    Uploading,
    /// Stored successfully.
    Completed {
        /// Where the file ended up.
        result: UploadResult,
    },
    /// Upload failed; waits for an explicit retry.
    Failed {
        /// Why it failed.
        error: JobError,
    },
    /// Cancelled by the caller; may be retried.
    Paused,
}

impl JobStatus {
    /// Short lowercase name of the state.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Paused => "paused",
        }
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// No automatic transition will follow: terminal or paused.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Paused)
    }

    /// Pending or uploading.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Uploading)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// File exceeds the size limit.
    FileTooLarge,
    /// MIME type not accepted.
    UnsupportedType,
    /// Storage credentials missing or rejected.
    Unauthenticated,
    /// Upload exceeded its deadline.
    Timeout,
    /// Storage unreachable.
    Network,
    /// Storage refused the object.
    BackendRejected,
    /// The process stopped while the job was in flight.
    Interrupted,
    /// Unexpected failure inside the upload task.
    Internal,
}

/// Failure recorded on a job, phrased for a retry prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Failure category.
    pub kind: JobErrorKind,
    /// Human-readable explanation.
    pub message: String,
    /// Whether retrying the same file may succeed.
    pub retryable: bool,
}

impl JobError {
    /// The job was in flight when the process stopped.
    pub fn interrupted(previous: &str) -> Self {
        Self {
            kind: JobErrorKind::Interrupted,
            message: format!(
                "Upload was interrupted while {previous}; add the file again to upload it"
            ),
            retryable: false,
        }
    }

    /// Unexpected failure inside the upload task.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Internal,
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<&UploadError> for JobError {
    fn from(err: &UploadError) -> Self {
        let kind = match err {
            UploadError::FileTooLarge { .. } => JobErrorKind::FileTooLarge,
            UploadError::UnsupportedType(_) => JobErrorKind::UnsupportedType,
            UploadError::Unauthenticated(_) => JobErrorKind::Unauthenticated,
            UploadError::Timeout(_) => JobErrorKind::Timeout,
            UploadError::NetworkError(_) => JobErrorKind::Network,
            UploadError::BackendRejected(_) => JobErrorKind::BackendRejected,
        };
        Self {
            kind,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// File captured at enqueue time.
///
/// The bytes are never serialized; a job restored from a snapshot has
/// metadata only.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    /// Original file name.
    pub file_name: String,
    /// Size in bytes at enqueue time.
    pub file_size: u64,
    /// Declared content type.
    pub mime_type: String,
    #[serde(skip)]
    data: Option<Bytes>,
}

impl JobFile {
    /// Metadata-only file, as restored from a snapshot.
    pub fn detached(file_name: impl Into<String>, file_size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            mime_type: mime_type.into(),
            data: None,
        }
    }

    /// Whether the bytes are still available for (re)upload.
    pub fn has_payload(&self) -> bool {
        self.data.is_some()
    }

    /// Rebuild the upload payload, if the bytes are available.
    pub fn payload(&self) -> Option<UploadPayload> {
        self.data.as_ref().map(|data| {
            UploadPayload::new(self.file_name.clone(), self.mime_type.clone(), data.clone())
        })
    }
}

impl From<UploadPayload> for JobFile {
    fn from(payload: UploadPayload) -> Self {
        Self {
            file_size: payload.size(),
            file_name: payload.file_name,
            mime_type: payload.mime_type,
            data: Some(payload.data),
        }
    }
}

impl fmt::Debug for JobFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFile")
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size)
            .field("mime_type", &self.mime_type)
            .field("has_payload", &self.data.is_some())
            .finish()
    }
}

/// Book/chapter/tab context an upload belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadScope {
    /// Registry id of the book, when the caller already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_id: Option<String>,
    /// Display name of the book; resolved to an id when `book_id` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
    /// Chapter inside the book.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    /// Editor tab that started the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    /// Asset classification.
    #[serde(default)]
    pub asset_type: AssetType,
}

impl UploadScope {
    /// Scope for a book identified by display name.
    pub fn for_book(book_name: impl Into<String>, asset_type: AssetType) -> Self {
        Self {
            book_name: Some(book_name.into()),
            asset_type,
            ..Self::default()
        }
    }

    /// Set the chapter.
    pub fn with_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    /// Set the editor tab.
    pub fn with_tab(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = Some(tab_id.into());
        self
    }
}

/// Caller-supplied description, for display only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Short text shown next to the progress bar.
    pub label: String,
    /// Free-form extra fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl JobMetadata {
    /// Metadata with only a label.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            details: Map::new(),
        }
    }

    /// Add a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// One tracked upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadJob {
    /// Stable identifier.
    pub id: JobId,
    /// File being uploaded.
    pub file: JobFile,
    /// Namespace context.
    pub scope: Option<UploadScope>,
    /// Display metadata.
    pub metadata: JobMetadata,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Number of accepted retries.
    pub retry_count: u32,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    /// A new pending job.
    pub fn new(file: JobFile, scope: Option<UploadScope>, metadata: JobMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            file,
            scope,
            metadata,
            status: JobStatus::Pending,
            progress: 0.0,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Result of a completed job.
    pub fn result(&self) -> Option<&UploadResult> {
        match &self.status {
            JobStatus::Completed { result } => Some(result),
            _ => None,
        }
    }

    /// Error of a failed job.
    pub fn error(&self) -> Option<&JobError> {
        match &self.status {
            JobStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Point-in-time view of every job, in enqueue order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    /// All jobs.
    pub jobs: Vec<UploadJob>,
    /// Pending plus uploading.
    pub active_count: usize,
    /// Currently uploading.
    pub uploading_count: usize,
    /// Completed.
    pub completed_count: usize,
    /// Failed.
    pub failed_count: usize,
    /// Paused.
    pub paused_count: usize,
}

impl UploadSnapshot {
    /// Compute a snapshot from `jobs`.
    pub fn from_jobs(jobs: Vec<UploadJob>) -> Self {
        let mut snapshot = Self::default();
        for job in &jobs {
            match job.status {
                JobStatus::Pending => snapshot.active_count += 1,
                JobStatus::Uploading => {
                    snapshot.active_count += 1;
                    snapshot.uploading_count += 1;
                }
                JobStatus::Completed { .. } => snapshot.completed_count += 1,
                JobStatus::Failed { .. } => snapshot.failed_count += 1,
                JobStatus::Paused => snapshot.paused_count += 1,
            }
        }
        snapshot.jobs = jobs;
        snapshot
    }

    /// Look up a job.
    pub fn job(&self, id: JobId) -> Option<&UploadJob> {
        self.jobs.iter().find(|job| job.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> UploadJob {
        UploadJob::new(
            JobFile::from(UploadPayload::new("a.png", "image/png", Bytes::from("abc"))),
            None,
            JobMetadata::labeled("diagram"),
        )
    }

    #[test]
    fn test_result_and_error_follow_status() {
        let mut job = job();
        assert!(job.result().is_none());
        assert!(job.error().is_none());

        job.transition(JobStatus::Failed {
            error: JobError::internal("boom"),
        });
        assert!(job.result().is_none());
        assert_eq!(job.error().map(|e| e.message.as_str()), Some("boom"));
    }

    #[test]
    fn test_serialized_job_omits_bytes() {
        let job = job();
        assert!(job.file.has_payload());

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["file"]["file_size"], 3);
        assert!(json["file"].get("data").is_none());
        assert_eq!(json["status"]["state"], "pending");

        let restored: UploadJob = serde_json::from_value(json).unwrap();
        assert!(!restored.file.has_payload());
        assert_eq!(restored.id, job.id);
    }

    #[test]
    fn test_job_error_from_upload_error() {
        let error = JobError::from(&UploadError::UnsupportedType("text/x-evil".to_string()));
        assert_eq!(error.kind, JobErrorKind::UnsupportedType);
        assert!(!error.retryable);
        assert!(error.message.contains("text/x-evil"));
    }

    #[test]
    fn test_snapshot_counts() {
        let mut completed = job();
        completed.transition(JobStatus::Completed {
            result: UploadResult {
                url: "u".into(),
                storage_key: "k".into(),
                size_bytes: 3,
                content_type: "image/png".into(),
            },
        });
        let mut uploading = job();
        uploading.transition(JobStatus::Uploading);

        let snapshot = UploadSnapshot::from_jobs(vec![job(), uploading, completed]);
        assert_eq!(snapshot.active_count, 2);
        assert_eq!(snapshot.uploading_count, 1);
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.failed_count, 0);
    }
}

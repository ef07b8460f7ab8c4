//! Best-effort snapshot of upload jobs in the local key-value store.
//!
//! Only job metadata and results are written; file bytes never are. On
//! restore, jobs that had not settled cannot continue (their bytes are gone)
//! and surface as failed with an `interrupted` error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bookshelf_core::error::AppError;
use bookshelf_core::result::AppResult;
use bookshelf_core::traits::KeyValueStore;

use crate::job::{JobError, JobStatus, UploadJob};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    jobs: Vec<UploadJob>,
}

/// Reads and writes the manager snapshot under one key.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SnapshotStore {
    /// Create a snapshot store writing `key` in `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Write `jobs`, replacing the previous snapshot.
    pub fn save(&self, jobs: &[UploadJob]) -> AppResult<()> {
        let snapshot = PersistedSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            jobs: jobs.to_vec(),
        };
        self.store.set(&self.key, &serde_json::to_string(&snapshot)?)?;
        debug!(key = %self.key, jobs = jobs.len(), "Saved upload snapshot");
        Ok(())
    }

    /// Read the last snapshot, exactly as written. Missing key → empty.
    pub fn load(&self) -> AppResult<Vec<UploadJob>> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        let snapshot: PersistedSnapshot = serde_json::from_str(&raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::validation(format!(
                "Unsupported upload snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot.jobs)
    }

    /// Read the last snapshot and convert unsettled jobs into interrupted
    /// failures.
    pub fn load_for_restore(&self) -> AppResult<Vec<UploadJob>> {
        Ok(self.load()?.into_iter().map(into_restored).collect())
    }

    /// Delete the snapshot.
    pub fn clear(&self) -> AppResult<()> {
        self.store.remove(&self.key)
    }
}

/// Map a persisted job to the state it has after a restart.
///
/// Completed and failed jobs are kept as they were. Pending, uploading and
/// paused jobs lost their bytes with the previous process and become
/// `failed: interrupted`.
pub fn into_restored(mut job: UploadJob) -> UploadJob {
    match &job.status {
        JobStatus::Completed { .. } | JobStatus::Failed { .. } => job,
        unsettled => {
            let error = JobError::interrupted(match unsettled {
                JobStatus::Pending => "waiting to upload",
                JobStatus::Uploading => "uploading",
                _ => "paused",
            });
            job.transition(JobStatus::Failed { error });
            job
        }
    }
}

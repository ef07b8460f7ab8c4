//! Scoped view over manager snapshots for one editing context.
//!
//! A view watches the manager's snapshot channel and keeps only the jobs of
//! one book, chapter or editor tab.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use bookshelf_core::identity::{IdentityResolver, normalize_name};

use crate::job::{JobStatus, UploadJob, UploadSnapshot};

/// Which jobs a view keeps. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextFilter {
    /// Exact book id.
    pub book_id: Option<String>,
    /// Book display name, compared after normalization.
    pub book_name: Option<String>,
    /// Exact chapter id.
    pub chapter_id: Option<String>,
    /// Exact editor tab id.
    pub tab_id: Option<String>,
}

impl ContextFilter {
    /// Filter on a book display name.
    pub fn book(name: impl Into<String>) -> Self {
        Self {
            book_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Filter on an editor tab.
    pub fn tab(tab_id: impl Into<String>) -> Self {
        Self {
            tab_id: Some(tab_id.into()),
            ..Self::default()
        }
    }

    /// Also require `chapter_id`.
    pub fn with_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    /// Replace a bare book name with the id it resolves to, so the filter
    /// also keeps jobs that were submitted by book id.
    pub fn resolved(mut self, resolver: &IdentityResolver) -> Self {
        if self.book_id.is_none() {
            self.book_id = self
                .book_name
                .take()
                .map(|name| resolver.resolve_book_id(&name).book_id);
        }
        self
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.book_id.is_none()
            && self.book_name.is_none()
            && self.chapter_id.is_none()
            && self.tab_id.is_none()
    }

    /// Whether `job` matches every set field.
    pub fn matches(&self, job: &UploadJob) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(scope) = &job.scope else {
            return false;
        };

        let same = |want: &Option<String>, have: &Option<String>| match want {
            None => true,
            Some(want) => have.as_deref() == Some(want.as_str()),
        };

        let name_matches = match &self.book_name {
            None => true,
            Some(want) => scope
                .book_name
                .as_deref()
                .is_some_and(|have| normalize_name(have) == normalize_name(want)),
        };

        name_matches
            && same(&self.book_id, &scope.book_id)
            && same(&self.chapter_id, &scope.chapter_id)
            && same(&self.tab_id, &scope.tab_id)
    }
}

/// Counts and aggregate progress for the jobs in a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadSummary {
    /// Waiting for a slot.
    pub pending: usize,
    /// Transferring.
    pub uploading: usize,
    /// Stored.
    pub completed: usize,
    /// Failed.
    pub failed: usize,
    /// Paused by the user.
    pub paused: usize,
    /// All jobs in the view.
    pub total: usize,
    /// Mean progress of pending and uploading jobs; 100 when none are
    /// active.
    pub overall_progress: f64,
}

/// Live, filtered view of the manager's jobs.
#[derive(Debug, Clone)]
pub struct ScopedUploads {
    rx: watch::Receiver<Arc<UploadSnapshot>>,
    filter: ContextFilter,
}

impl ScopedUploads {
    /// Create a view over `rx` keeping jobs that match `filter`.
    pub fn new(rx: watch::Receiver<Arc<UploadSnapshot>>, filter: ContextFilter) -> Self {
        Self { rx, filter }
    }

    /// The filter in use.
    pub fn filter(&self) -> &ContextFilter {
        &self.filter
    }

    /// Matching jobs in enqueue order.
    pub fn jobs(&self) -> Vec<UploadJob> {
        self.rx
            .borrow()
            .jobs
            .iter()
            .filter(|job| self.filter.matches(job))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> UploadSummary {
        let snapshot = self.rx.borrow();
        let mut summary = UploadSummary::default();
        let mut active_progress = 0.0;

        for job in snapshot.jobs.iter().filter(|job| self.filter.matches(job)) {
            summary.total += 1;
            match job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Uploading => summary.uploading += 1,
                JobStatus::Completed { .. } => summary.completed += 1,
                JobStatus::Failed { .. } => summary.failed += 1,
                JobStatus::Paused => summary.paused += 1,
            }
            if job.status.is_active() {
                active_progress += job.progress;
            }
        }

        let active = summary.pending + summary.uploading;
        summary.overall_progress = if active == 0 {
            100.0
        } else {
            active_progress / active as f64
        };
        summary
    }

    /// Whether any matching job is pending or uploading.
    pub fn has_active(&self) -> bool {
        self.rx
            .borrow()
            .jobs
            .iter()
            .any(|job| job.status.is_active() && self.filter.matches(job))
    }

    /// Wait for the next snapshot. Returns `false` once the manager is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use bookshelf_core::registry::StaticBookRegistry;
    use bookshelf_core::traits::BookEntry;
    use bookshelf_core::types::AssetType;
    use bookshelf_storage::upload::UploadPayload;

    use super::*;
    use crate::job::{JobFile, JobMetadata, UploadScope};

    fn job(scope: Option<UploadScope>, status: JobStatus, progress: f64) -> UploadJob {
        let mut job = UploadJob::new(
            JobFile::from(UploadPayload::new("a.png", "image/png", Bytes::from_static(b"x"))),
            scope,
            JobMetadata::default(),
        );
        job.progress = progress;
        job.status = status;
        job
    }

    fn view(jobs: Vec<UploadJob>, filter: ContextFilter) -> ScopedUploads {
        let (_, rx) = watch::channel(Arc::new(UploadSnapshot::from_jobs(jobs)));
        ScopedUploads::new(rx, filter)
    }

    #[test]
    fn test_filter_by_book_name_is_normalized() {
        let scope = UploadScope::for_book("Field  Notes", AssetType::Image);
        let filter = ContextFilter::book("field notes ");
        assert!(filter.matches(&job(Some(scope), JobStatus::Pending, 0.0)));
        assert!(!filter.matches(&job(None, JobStatus::Pending, 0.0)));
    }

    #[test]
    fn test_filter_requires_every_field() {
        let scope = UploadScope::for_book("Atlas", AssetType::Image)
            .with_chapter("c1")
            .with_tab("t1");
        let job = job(Some(scope), JobStatus::Pending, 0.0);

        assert!(ContextFilter::tab("t1").matches(&job));
        assert!(ContextFilter::book("atlas").with_chapter("c1").matches(&job));
        assert!(!ContextFilter::book("atlas").with_chapter("c2").matches(&job));
        assert!(ContextFilter::default().matches(&job));
    }

    #[test]
    fn test_resolved_filter_matches_by_id() {
        let resolver = IdentityResolver::new(Arc::new(StaticBookRegistry::new(vec![BookEntry {
            id: "b-42".to_string(),
            name: "Field Notes".to_string(),
        }])));
        let filter = ContextFilter::book("field  notes").resolved(&resolver);
        assert_eq!(filter.book_id.as_deref(), Some("b-42"));
        assert!(filter.book_name.is_none());

        let by_id = UploadScope {
            book_id: Some("b-42".to_string()),
            ..UploadScope::default()
        };
        assert!(filter.matches(&job(Some(by_id), JobStatus::Pending, 0.0)));
        assert!(!filter.matches(&job(
            Some(UploadScope::for_book("Field Notes", AssetType::Image)),
            JobStatus::Pending,
            0.0
        )));

        let pinned = ContextFilter {
            book_id: Some("b-7".to_string()),
            book_name: Some("Field Notes".to_string()),
            ..ContextFilter::default()
        };
        assert_eq!(pinned.clone().resolved(&resolver), pinned);
    }

    #[test]
    fn test_summary_and_active() {
        let tab = |t: &str| Some(UploadScope::default().with_tab(t));
        let view = view(
            vec![
                job(tab("a"), JobStatus::Uploading, 50.0),
                job(tab("a"), JobStatus::Pending, 0.0),
                job(tab("a"), JobStatus::Paused, 30.0),
                job(tab("b"), JobStatus::Uploading, 90.0),
            ],
            ContextFilter::tab("a"),
        );

        let summary = view.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.uploading, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.paused, 1);
        assert_eq!(summary.overall_progress, 25.0);
        assert!(view.has_active());
        assert_eq!(view.jobs().len(), 3);
    }

    #[test]
    fn test_idle_view() {
        let view = view(Vec::new(), ContextFilter::tab("a"));
        let summary = view.summary();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.overall_progress, 100.0);
        assert!(!view.has_active());
    }
}

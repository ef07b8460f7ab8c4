//! Background upload manager.
//!
//! Owns every [`UploadJob`], admits pending jobs in FIFO order up to the
//! configured concurrency, runs each upload as a spawned task, and tells
//! subscribers about every change. Mutations are synchronous: the state
//! mutex is never held across an await.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bookshelf_core::IdentityResolver;
use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_core::result::AppResult;
use bookshelf_core::types::JobId;
use bookshelf_storage::keys::{self, KeyScope};
use bookshelf_storage::upload::{AssetUploadClient, UploadPayload, UploadTarget};

use crate::job::{
    JobError, JobFile, JobMetadata, JobStatus, UploadJob, UploadResult, UploadScope,
    UploadSnapshot,
};
use crate::observer::{ContextFilter, ScopedUploads};
use crate::persistence::SnapshotStore;
use crate::subscription::{Listener, Listeners, Subscription};

/// In-flight attempt of one job.
#[derive(Debug)]
struct Attempt {
    number: u64,
    cancel: CancellationToken,
}

/// Snapshot waiting to be delivered.
#[derive(Debug)]
struct Notice {
    snapshot: Arc<UploadSnapshot>,
    persist: bool,
}

#[derive(Debug, Default)]
struct State {
    /// Every job, in enqueue order.
    jobs: Vec<UploadJob>,
    /// Pending jobs awaiting a slot, oldest first.
    queue: VecDeque<JobId>,
    inflight: HashMap<JobId, Attempt>,
    next_attempt: u64,
    outbox: VecDeque<Notice>,
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Option<&mut UploadJob> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    fn uploading(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status == JobStatus::Uploading)
            .count()
    }

    /// Whether `attempt` is still the live attempt of an uploading job.
    fn is_current(&self, id: JobId, attempt: u64) -> bool {
        self.inflight.get(&id).is_some_and(|a| a.number == attempt)
            && self
                .jobs
                .iter()
                .any(|job| job.id == id && job.status == JobStatus::Uploading)
    }

    fn snapshot(&self) -> Arc<UploadSnapshot> {
        Arc::new(UploadSnapshot::from_jobs(self.jobs.clone()))
    }

    /// Queue the current state for delivery. `persist` is set for status
    /// transitions and cleared for progress ticks.
    fn stage(&mut self, persist: bool) {
        let snapshot = self.snapshot();
        self.outbox.push_back(Notice { snapshot, persist });
    }
}

/// Everything an upload task needs once it owns a slot.
struct Started {
    id: JobId,
    attempt: u64,
    payload: UploadPayload,
    scope: Option<UploadScope>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Inner {
    client: AssetUploadClient,
    resolver: IdentityResolver,
    persistence: Option<SnapshotStore>,
    /// Snapshot of the previous run, read at construction and taken by
    /// `restore`.
    saved: Mutex<Option<AppResult<Vec<UploadJob>>>>,
    max_concurrent: usize,
    state: Mutex<State>,
    listeners: Arc<Listeners>,
    dispatching: Mutex<()>,
    watch_tx: watch::Sender<Arc<UploadSnapshot>>,
    runtime: Handle,
}

/// Handle to the background upload manager. Cloning is cheap; all clones
/// share the same jobs.
#[derive(Debug, Clone)]
pub struct UploadManager {
    inner: Arc<Inner>,
}

impl UploadManager {
    /// Create a manager uploading through `client`.
    ///
    /// Must be called inside a Tokio runtime; upload tasks are spawned on
    /// it. With `persistence`, every status transition is saved there.
    pub fn new(
        client: AssetUploadClient,
        resolver: IdentityResolver,
        persistence: Option<SnapshotStore>,
    ) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            AppError::with_source(
                ErrorKind::Internal,
                "UploadManager must be created inside a Tokio runtime",
                e,
            )
        })?;
        let max_concurrent = client.config().max_concurrent_uploads.max(1);
        let (watch_tx, _) = watch::channel(Arc::new(UploadSnapshot::default()));
        // The first change after this point overwrites the saved snapshot.
        let saved = persistence.as_ref().map(SnapshotStore::load_for_restore);

        info!(max_concurrent, "Upload manager started");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                resolver,
                persistence,
                saved: Mutex::new(saved),
                max_concurrent,
                state: Mutex::new(State::default()),
                listeners: Arc::new(Listeners::default()),
                dispatching: Mutex::new(()),
                watch_tx,
                runtime,
            }),
        })
    }

    /// Number of uploads allowed to run at once.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Queue `file` and return immediately with the new job's id.
    ///
    /// A scope naming its book only by display name gets the resolved
    /// `book_id` recorded on it.
    pub fn add_upload(
        &self,
        file: UploadPayload,
        scope: Option<UploadScope>,
        metadata: JobMetadata,
    ) -> JobId {
        let scope = scope.map(|scope| self.inner.resolve_scope(scope));
        let job = UploadJob::new(JobFile::from(file), scope, metadata);
        let id = job.id;
        info!(
            job_id = %id,
            file = %job.file.file_name,
            size = job.file.file_size,
            "Upload queued"
        );

        {
            let mut state = self.inner.lock_state();
            state.jobs.push(job);
            state.queue.push_back(id);
            state.stage(true);
        }
        self.inner.dispatch();
        self.inner.pump();
        id
    }

    /// Pause a pending or uploading job.
    ///
    /// Returns `true` when the job ends up paused (including when it already
    /// was), `false` for unknown, completed or failed jobs. An in-flight
    /// transfer is cancelled and its slot freed at once.
    pub fn cancel_upload(&self, id: JobId) -> bool {
        let attempt = {
            let mut state = self.inner.lock_state();
            let Some(job) = state.job_mut(id) else {
                return false;
            };
            match job.status {
                JobStatus::Paused => return true,
                JobStatus::Completed { .. } | JobStatus::Failed { .. } => return false,
                JobStatus::Pending | JobStatus::Uploading => {}
            }
            job.transition(JobStatus::Paused);
            state.queue.retain(|queued| *queued != id);
            let attempt = state.inflight.remove(&id);
            state.stage(true);
            attempt
        };

        if let Some(attempt) = attempt {
            attempt.cancel.cancel();
            debug!(job_id = %id, attempt = attempt.number, "Cancelled in-flight upload");
        }
        info!(job_id = %id, "Upload paused");

        self.inner.dispatch();
        self.inner.pump();
        true
    }

    /// Requeue a failed or paused job whose bytes are still held.
    pub fn retry_upload(&self, id: JobId) -> bool {
        {
            let mut state = self.inner.lock_state();
            let Some(job) = state.job_mut(id) else {
                return false;
            };
            if !matches!(job.status, JobStatus::Failed { .. } | JobStatus::Paused) {
                return false;
            }
            if !job.file.has_payload() {
                debug!(job_id = %id, "Retry refused: file contents are not available");
                return false;
            }
            job.progress = 0.0;
            job.retry_count += 1;
            job.transition(JobStatus::Pending);
            info!(job_id = %id, retry_count = job.retry_count, "Upload requeued");
            state.queue.push_back(id);
            state.stage(true);
        }
        self.inner.dispatch();
        self.inner.pump();
        true
    }

    /// Remove completed and failed jobs. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock_state();
            let before = state.jobs.len();
            state.jobs.retain(|job| !job.status.is_terminal());
            let removed = before - state.jobs.len();
            if removed > 0 {
                state.stage(true);
            }
            removed
        };
        if removed > 0 {
            info!(removed, "Cleared finished uploads");
            self.inner.dispatch();
        }
        removed
    }

    /// Current snapshot, computed now.
    pub fn get_state(&self) -> UploadSnapshot {
        UploadSnapshot::from_jobs(self.inner.lock_state().jobs.clone())
    }

    /// Current copy of one job.
    pub fn get_job(&self, id: JobId) -> Option<UploadJob> {
        self.inner
            .lock_state()
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }

    /// Call `listener` with the full snapshot after every change, until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UploadSnapshot) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.add(listener)
    }

    /// Latest delivered snapshot, for consumers that poll or await changes.
    pub fn watch(&self) -> watch::Receiver<Arc<UploadSnapshot>> {
        self.inner.watch_tx.subscribe()
    }

    /// Jobs matching `filter`, kept current. A book name in the filter is
    /// resolved to its id first.
    pub fn scoped(&self, filter: ContextFilter) -> ScopedUploads {
        ScopedUploads::new(self.watch(), filter.resolved(&self.inner.resolver))
    }

    /// Wait until the job is completed, failed or paused and return it.
    /// `None` if the job does not exist or is cleared while waiting.
    pub async fn wait_for(&self, id: JobId) -> Option<UploadJob> {
        let mut rx = self.watch();
        loop {
            rx.borrow_and_update();
            let job = self.get_job(id)?;
            if job.status.is_settled() {
                return Some(job);
            }
            if rx.changed().await.is_err() {
                return self.get_job(id);
            }
        }
    }

    /// Bring back the jobs of the previous run, as saved when this manager
    /// was created, ahead of the live ones (which were all enqueued later).
    ///
    /// Completed and failed jobs come back unchanged. Jobs that were still
    /// pending, uploading or paused come back failed as interrupted, since
    /// their bytes did not survive. Returns the number of jobs added; only
    /// the first call adds anything.
    pub fn restore(&self) -> AppResult<usize> {
        let saved = self
            .inner
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(saved) = saved else {
            return Ok(0);
        };
        let restored = saved?;

        let added = {
            let mut state = self.inner.lock_state();
            let known: HashSet<JobId> = state.jobs.iter().map(|job| job.id).collect();
            let mut jobs: Vec<UploadJob> = restored
                .into_iter()
                .filter(|job| !known.contains(&job.id))
                .collect();
            let added = jobs.len();
            jobs.append(&mut state.jobs);
            state.jobs = jobs;
            if added > 0 {
                state.stage(true);
            }
            added
        };

        info!(restored = added, "Restored upload jobs");
        if added > 0 {
            self.inner.dispatch();
        }
        Ok(added)
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill in `book_id` from `book_name` when only the name is given.
    fn resolve_scope(&self, mut scope: UploadScope) -> UploadScope {
        let has_id = scope
            .book_id
            .as_deref()
            .is_some_and(|book| !book.trim().is_empty());
        if !has_id {
            scope.book_id = scope
                .book_name
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .map(|name| self.resolver.resolve_book_id(name).book_id);
        }
        scope
    }

    /// Start pending jobs while slots are free.
    fn pump(self: &Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut state = self.lock_state();
            let mut changed = false;

            while state.uploading() < self.max_concurrent {
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                let Some(job) = state.job_mut(id) else {
                    continue;
                };
                if job.status != JobStatus::Pending {
                    continue;
                }

                let Some(payload) = job.file.payload() else {
                    job.transition(JobStatus::Failed {
                        error: JobError::internal("File contents are no longer available"),
                    });
                    changed = true;
                    continue;
                };
                if let Err(err) = self.client.validate(payload.size(), &payload.mime_type) {
                    warn!(job_id = %id, error = %err, "Upload rejected before start");
                    job.transition(JobStatus::Failed {
                        error: JobError::from(&err),
                    });
                    changed = true;
                    continue;
                }

                job.progress = 0.0;
                job.transition(JobStatus::Uploading);
                let scope = job.scope.clone();

                state.next_attempt += 1;
                let attempt = state.next_attempt;
                let cancel = CancellationToken::new();
                state.inflight.insert(
                    id,
                    Attempt {
                        number: attempt,
                        cancel: cancel.clone(),
                    },
                );
                started.push(Started {
                    id,
                    attempt,
                    payload,
                    scope,
                    cancel,
                });
                changed = true;
            }

            if changed {
                state.stage(true);
            }
        }

        self.dispatch();

        for start in started {
            debug!(job_id = %start.id, attempt = start.attempt, "Upload started");
            let inner = Arc::clone(self);
            self.runtime.spawn(inner.run_upload(start));
        }
    }

    async fn run_upload(self: Arc<Self>, start: Started) {
        let Started {
            id,
            attempt,
            payload,
            scope,
            cancel,
        } = start;

        let reporter = Arc::clone(&self);
        let on_progress = move |percent: f64| reporter.apply_progress(id, attempt, percent);

        let upload = async {
            let target = self.target_for(id, &payload, scope.as_ref());
            self.client.upload_to(&payload, &target, on_progress).await
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %id, attempt, "Upload task stopped after cancellation");
                return;
            }
            outcome = AssertUnwindSafe(upload).catch_unwind() => outcome,
        };

        let result = match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(JobError::from(&err)),
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(job_id = %id, panic = %message, "Upload task panicked");
                Err(JobError::internal(format!("Upload task panicked: {message}")))
            }
        };
        self.finish(id, attempt, result);
    }

    /// Destination of a job's upload.
    fn target_for(
        &self,
        id: JobId,
        payload: &UploadPayload,
        scope: Option<&UploadScope>,
    ) -> UploadTarget {
        let book_id = scope.and_then(|scope| scope.book_id.clone());
        let asset_type = scope.map(|scope| scope.asset_type).unwrap_or_default();

        let unique = id.into_uuid().simple().to_string();
        let storage_key = keys::destination_key(
            KeyScope {
                book_id: book_id.as_deref(),
                chapter_id: scope.and_then(|scope| scope.chapter_id.as_deref()),
                asset_type,
            },
            &unique,
            &payload.file_name,
        );

        UploadTarget {
            storage_key,
            book_id,
            asset_type,
        }
    }

    fn apply_progress(&self, id: JobId, attempt: u64, percent: f64) {
        {
            let mut state = self.lock_state();
            if !state.is_current(id, attempt) {
                return;
            }
            let Some(job) = state.job_mut(id) else {
                return;
            };
            let percent = percent.clamp(0.0, 100.0);
            if percent <= job.progress {
                return;
            }
            job.progress = percent;
            state.stage(false);
        }
        self.dispatch();
    }

    fn finish(self: &Arc<Self>, id: JobId, attempt: u64, result: Result<UploadResult, JobError>) {
        {
            let mut state = self.lock_state();
            if !state.is_current(id, attempt) {
                debug!(job_id = %id, attempt, "Discarding late upload result");
                return;
            }
            state.inflight.remove(&id);
            if let Some(job) = state.job_mut(id) {
                match result {
                    Ok(result) => {
                        info!(job_id = %id, url = %result.url, "Upload completed");
                        job.progress = 100.0;
                        job.transition(JobStatus::Completed { result });
                    }
                    Err(error) => {
                        warn!(
                            job_id = %id,
                            kind = ?error.kind,
                            retryable = error.retryable,
                            error = %error,
                            "Upload failed"
                        );
                        job.transition(JobStatus::Failed { error });
                    }
                }
            }
            state.stage(true);
        }
        self.dispatch();
        self.pump();
    }

    /// Deliver staged snapshots in order.
    ///
    /// One caller drains the outbox at a time. A listener that mutates the
    /// manager stages a new snapshot and returns; the active dispatcher
    /// picks it up on its next pass.
    fn dispatch(&self) {
        loop {
            let guard = match self.dispatching.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };

            loop {
                let Some(notice) = self.lock_state().outbox.pop_front() else {
                    break;
                };
                if notice.persist {
                    self.persist(&notice.snapshot);
                }
                self.watch_tx.send_replace(Arc::clone(&notice.snapshot));
                self.listeners.notify(&notice.snapshot);
            }

            drop(guard);
            if self.lock_state().outbox.is_empty() {
                return;
            }
        }
    }

    fn persist(&self, snapshot: &UploadSnapshot) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.save(&snapshot.jobs) {
            warn!(error = %e, "Failed to persist upload snapshot");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

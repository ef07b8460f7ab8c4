//! Background uploads for Bookshelf.
//!
//! This crate provides:
//! - The upload job model and its snapshot
//! - An upload manager that runs jobs with bounded concurrency
//! - Best-effort persistence of job snapshots across restarts
//! - Scoped views for a single book, chapter, or editor tab
//! - Migration of inline assets found in legacy documents

pub mod job;
pub mod manager;
pub mod migration;
pub mod observer;
pub mod persistence;
pub mod subscription;

pub use job::{
    JobError, JobErrorKind, JobMetadata, JobStatus, UploadJob, UploadResult, UploadScope,
    UploadSnapshot,
};
pub use manager::UploadManager;
pub use migration::{LegacyAssetMigrator, MigrationReport};
pub use observer::{ContextFilter, ScopedUploads, UploadSummary};
pub use persistence::SnapshotStore;
pub use subscription::Subscription;

//! File upload CLI command.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use clap::{Args, ValueEnum};
use serde::Serialize;
use tabled::Tabled;

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_core::types::AssetType;
use bookshelf_storage::UploadPayload;
use bookshelf_worker::{ContextFilter, JobMetadata, UploadJob, UploadManager, UploadScope};

use super::AppContext;
use crate::output::{self, OutputFormat};

/// Arguments for the upload command
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Book display name, resolved to the book's id
    #[arg(short, long)]
    pub book: Option<String>,

    /// Book id, when already known
    #[arg(long, conflicts_with = "book")]
    pub book_id: Option<String>,

    /// Chapter inside the book
    #[arg(long)]
    pub chapter: Option<String>,

    /// Editor tab the uploads belong to
    #[arg(long)]
    pub tab: Option<String>,

    /// Asset type; derived from each file's content type when omitted
    #[arg(short = 't', long, value_enum)]
    pub asset_type: Option<AssetKind>,

    /// Content type for every file instead of guessing from the extension
    #[arg(long)]
    pub mime_type: Option<String>,
}

/// Asset type choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AssetKind {
    Image,
    Pdf,
    Audio,
    Video,
    Attachment,
}

impl From<AssetKind> for AssetType {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Image => Self::Image,
            AssetKind::Pdf => Self::Pdf,
            AssetKind::Audio => Self::Audio,
            AssetKind::Video => Self::Video,
            AssetKind::Attachment => Self::Attachment,
        }
    }
}

/// Upload result row
#[derive(Debug, Serialize, Tabled)]
pub struct JobRow {
    /// Job ID
    pub id: String,
    /// File name
    pub file: String,
    /// Size
    pub size: String,
    /// Status
    pub status: String,
    /// Progress
    pub progress: String,
    /// Retries
    pub retries: u32,
    /// URL on success, reason on failure
    pub detail: String,
}

impl From<&UploadJob> for JobRow {
    fn from(job: &UploadJob) -> Self {
        let detail = match (job.result(), job.error()) {
            (Some(result), _) => result.url.clone(),
            (_, Some(error)) => error.message.clone(),
            _ => String::new(),
        };
        Self {
            id: job.id.to_string(),
            file: job.file.file_name.clone(),
            size: output::human_size(job.file.file_size),
            status: job.status.label().to_string(),
            progress: format!("{:.0}%", job.progress),
            retries: job.retry_count,
            detail,
        }
    }
}

/// Execute the upload command
pub async fn execute(
    args: &UploadArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let context = AppContext::open(config)?;
    let manager = context.manager().await?;

    let tab = args
        .tab
        .clone()
        .unwrap_or_else(|| format!("cli-{}", std::process::id()));

    let mut ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let payload = read_payload(path, args.mime_type.as_deref()).await?;
        let scope = scope_for(args, &payload.mime_type, &tab);
        let label = payload.file_name.clone();
        let metadata = JobMetadata::labeled(label).with_detail("path", path.display().to_string());
        ids.push(manager.add_upload(payload, Some(scope), metadata));
    }

    wait_until_idle(&manager, &tab, format).await;

    let jobs: Vec<UploadJob> = ids.iter().filter_map(|id| manager.get_job(*id)).collect();
    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
    output::print_list(&rows, format);

    let failed = jobs.iter().filter(|job| job.error().is_some()).count();
    if failed > 0 {
        return Err(AppError::external_service(format!(
            "{failed} of {} uploads failed",
            jobs.len()
        )));
    }
    if format == OutputFormat::Table {
        output::print_success(&format!("Uploaded {} file(s)", jobs.len()));
    }
    Ok(())
}

async fn read_payload(path: &Path, mime_type: Option<&str>) -> Result<UploadPayload, AppError> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Storage
        };
        AppError::with_source(kind, format!("Failed to read {}", path.display()), e)
    })?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime_type = mime_type.map(str::to_string).unwrap_or_else(|| {
        mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    Ok(UploadPayload::new(file_name, mime_type, Bytes::from(data)))
}

fn scope_for(args: &UploadArgs, mime_type: &str, tab: &str) -> UploadScope {
    UploadScope {
        book_id: args.book_id.clone(),
        book_name: args.book.clone(),
        chapter_id: args.chapter.clone(),
        tab_id: Some(tab.to_string()),
        asset_type: args
            .asset_type
            .map(AssetType::from)
            .unwrap_or_else(|| AssetType::from_mime(mime_type)),
    }
}

/// Follow this invocation's jobs until none is pending or uploading.
async fn wait_until_idle(manager: &UploadManager, tab: &str, format: OutputFormat) {
    let mut view = manager.scoped(ContextFilter::tab(tab));
    let mut last_line = String::new();

    while view.has_active() {
        if format == OutputFormat::Table {
            let summary = view.summary();
            let line = format!(
                "  {}/{} finished, {:.0}% of active uploads",
                summary.completed + summary.failed,
                summary.total,
                summary.overall_progress
            );
            if line != last_line {
                eprintln!("{line}");
                last_line = line;
            }
        }
        if !view.changed().await {
            break;
        }
    }
}

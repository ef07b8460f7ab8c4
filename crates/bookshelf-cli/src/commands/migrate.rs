//! Legacy document migration CLI command.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_worker::migration::{self, MigrationReport, ReferenceKind};
use bookshelf_worker::{LegacyAssetMigrator, UploadScope};

use super::AppContext;
use crate::output::{self, OutputFormat};

/// Arguments for the migrate command
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Legacy JSON document
    pub input: PathBuf,

    /// Where to write the rewritten document (default: overwrite the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Book the embedded assets belong to
    #[arg(short, long)]
    pub book: Option<String>,

    /// Chapter the embedded assets belong to
    #[arg(long)]
    pub chapter: Option<String>,

    /// List the references without uploading anything
    #[arg(long)]
    pub dry_run: bool,
}

/// One reference and what happened to it
#[derive(Debug, Serialize, Tabled)]
struct ReferenceRow {
    /// JSON pointer
    pointer: String,
    /// Outcome
    outcome: String,
    /// URL or reason
    detail: String,
}

fn report_rows(report: &MigrationReport) -> Vec<ReferenceRow> {
    let mut rows: Vec<ReferenceRow> = report
        .migrated
        .iter()
        .map(|asset| ReferenceRow {
            pointer: asset.pointer.clone(),
            outcome: "migrated".to_string(),
            detail: asset.url.clone(),
        })
        .collect();

    let skipped = [
        ("failed", &report.failed),
        ("unresolvable", &report.unresolvable),
        ("invalid", &report.invalid),
    ];
    for (outcome, assets) in skipped {
        rows.extend(assets.iter().map(|asset| ReferenceRow {
            pointer: asset.pointer.clone(),
            outcome: outcome.to_string(),
            detail: asset.reason.clone(),
        }));
    }
    rows.sort_by(|a, b| a.pointer.cmp(&b.pointer));
    rows
}

/// Execute the migrate command
pub async fn execute(
    args: &MigrateArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let raw = tokio::fs::read_to_string(&args.input).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::NotFound,
            format!("Failed to read {}", args.input.display()),
            e,
        )
    })?;
    let mut document: Value = serde_json::from_str(&raw)?;

    if args.dry_run {
        let rows: Vec<ReferenceRow> = migration::scan(&document)
            .into_iter()
            .map(|reference| {
                let (outcome, detail) = match reference.kind {
                    ReferenceKind::DataUri { mime_type } => ("data uri", mime_type),
                    ReferenceKind::BlobUrl => ("blob url", String::new()),
                };
                ReferenceRow {
                    pointer: reference.pointer,
                    outcome: outcome.to_string(),
                    detail,
                }
            })
            .collect();
        output::print_list(&rows, format);
        return Ok(());
    }

    let context = AppContext::open(config)?;
    let manager = context.manager().await?;
    let scope = args.book.as_ref().map(|book| UploadScope {
        book_name: Some(book.clone()),
        chapter_id: args.chapter.clone(),
        ..UploadScope::default()
    });

    let report = LegacyAssetMigrator::new(manager)
        .migrate(&mut document, scope)
        .await;

    let target = args.output.as_ref().unwrap_or(&args.input);
    if !report.migrated.is_empty() {
        let json = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(target, json).await?;
    }

    match format {
        OutputFormat::Json => output::print_item(&report, format),
        OutputFormat::Table => {
            output::print_list(&report_rows(&report), format);
            if report.is_clean() {
                output::print_success(&format!(
                    "Migrated {} asset(s) into {}",
                    report.migrated.len(),
                    target.display()
                ));
            } else {
                output::print_warning(&format!(
                    "{} reference(s) left in place",
                    report.failed.len() + report.unresolvable.len() + report.invalid.len()
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bookshelf_core::types::JobId;
    use bookshelf_worker::migration::{MigratedAsset, SkippedAsset};

    use super::*;

    #[test]
    fn test_report_rows_are_sorted_by_pointer() {
        let report = MigrationReport {
            migrated: vec![MigratedAsset {
                pointer: "/b".to_string(),
                job_id: JobId::new(),
                url: "https://cdn/x.png".to_string(),
            }],
            unresolvable: vec![SkippedAsset {
                pointer: "/a".to_string(),
                reason: "blob".to_string(),
            }],
            ..MigrationReport::default()
        };

        let rows = report_rows(&report);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].outcome, "unresolvable");
        assert_eq!(rows[1].detail, "https://cdn/x.png");
    }
}

//! Asset catalog CLI command.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::AppError;
use bookshelf_core::types::AssetRecord;

use super::AppContext;
use crate::output::{self, OutputFormat};

/// Arguments for the assets command
#[derive(Debug, Args)]
pub struct AssetsArgs {
    /// Only assets of this book id
    #[arg(long)]
    pub book_id: Option<String>,
}

/// Asset display row
#[derive(Debug, Serialize, Tabled)]
struct AssetRow {
    /// Storage key
    key: String,
    /// Asset type
    kind: String,
    /// Size
    size: String,
    /// Book id
    book: String,
    /// Upload time
    uploaded: String,
}

impl From<&AssetRecord> for AssetRow {
    fn from(record: &AssetRecord) -> Self {
        Self {
            key: record.storage_key.clone(),
            kind: record.asset_type.to_string(),
            size: output::human_size(record.size_bytes),
            book: record.book_id.clone().unwrap_or_else(|| "-".to_string()),
            uploaded: record.uploaded_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Execute the assets command
pub async fn execute(
    args: &AssetsArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let context = AppContext::open(config)?;
    let records: Vec<AssetRecord> = context
        .catalog
        .list()?
        .into_iter()
        .filter(|record| {
            args.book_id
                .as_deref()
                .is_none_or(|book| record.book_id.as_deref() == Some(book))
        })
        .collect();

    match format {
        OutputFormat::Json => output::print_item(&records, format),
        OutputFormat::Table => {
            let rows: Vec<AssetRow> = records.iter().map(AssetRow::from).collect();
            output::print_list(&rows, format);
        }
    }
    Ok(())
}

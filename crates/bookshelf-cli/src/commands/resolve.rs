//! Book identity CLI command.

use clap::Args;
use serde::Serialize;

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::AppError;
use bookshelf_core::identity::normalize_name;

use super::AppContext;
use crate::output::{self, OutputFormat};

/// Arguments for the resolve command
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Book display name
    pub name: String,
}

#[derive(Debug, Serialize)]
struct Resolution {
    name: String,
    normalized: String,
    book_id: String,
    source: &'static str,
}

/// Execute the resolve command
pub async fn execute(
    args: &ResolveArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let context = AppContext::open(config)?;
    let identity = context.resolver.resolve_book_id(&args.name);

    output::print_item(
        &Resolution {
            name: args.name.clone(),
            normalized: normalize_name(&args.name),
            book_id: identity.book_id,
            source: if identity.is_known { "registry" } else { "derived" },
        },
        format,
    );
    Ok(())
}

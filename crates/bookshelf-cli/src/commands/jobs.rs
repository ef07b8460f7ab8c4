//! Persisted upload job CLI commands.

use clap::{Args, Subcommand};

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::AppError;

use super::AppContext;
use super::upload::JobRow;
use crate::output::{self, OutputFormat};

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Jobs subcommand
    #[command(subcommand)]
    pub command: JobsCommand,
}

/// Jobs subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List jobs as saved by the last run
    List,
    /// Remove completed and failed jobs
    Clear,
}

/// Execute job commands
pub async fn execute(
    args: &JobsArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let context = AppContext::open(config)?;

    match &args.command {
        JobsCommand::List => {
            let jobs = context.snapshots.load()?;
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }
        JobsCommand::Clear => {
            let manager = context.manager().await?;
            let removed = manager.clear_completed();
            let left = manager.get_state().jobs.len();
            output::print_success(&format!("Removed {removed} job(s), {left} left"));
        }
    }
    Ok(())
}

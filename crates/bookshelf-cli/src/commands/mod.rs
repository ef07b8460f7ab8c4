//! CLI command definitions and dispatch.

pub mod assets;
pub mod jobs;
pub mod migrate;
pub mod resolve;
pub mod upload;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use bookshelf_core::config::AppConfig;
use bookshelf_core::error::AppError;
use bookshelf_core::kv::FileKvStore;
use bookshelf_core::registry::KvBookRegistry;
use bookshelf_core::traits::KeyValueStore;
use bookshelf_core::IdentityResolver;
use bookshelf_storage::providers;
use bookshelf_storage::{AssetUploadClient, KvAssetCatalog, StaticTokenAuth};
use bookshelf_worker::{SnapshotStore, UploadManager};

use crate::output::OutputFormat;

/// Bookshelf: upload and migrate book assets
#[derive(Debug, Parser)]
#[command(name = "bookshelf", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload files in the background and wait for them
    Upload(upload::UploadArgs),
    /// Move inline assets of a legacy document into storage
    Migrate(migrate::MigrateArgs),
    /// Inspect or clear persisted upload jobs
    Jobs(jobs::JobsArgs),
    /// List cataloged assets
    Assets(assets::AssetsArgs),
    /// Show the id a book name resolves to
    Resolve(resolve::ResolveArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Upload(args) => upload::execute(args, config, self.format).await,
            Commands::Migrate(args) => migrate::execute(args, config, self.format).await,
            Commands::Jobs(args) => jobs::execute(args, config, self.format).await,
            Commands::Assets(args) => assets::execute(args, config, self.format).await,
            Commands::Resolve(args) => resolve::execute(args, config, self.format).await,
        }
    }
}

/// Services shared by the commands, wired from configuration.
#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    pub resolver: IdentityResolver,
    pub catalog: Arc<KvAssetCatalog>,
    pub snapshots: SnapshotStore,
}

impl AppContext {
    /// Open local state and build the resolver and catalog.
    pub fn open(config: AppConfig) -> Result<Self, AppError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::open(&config.persistence.path)?);
        let registry = KvBookRegistry::new(Arc::clone(&store), config.persistence.registry_key.clone());
        let catalog = KvAssetCatalog::new(Arc::clone(&store), config.persistence.catalog_prefix.clone());
        let snapshots = SnapshotStore::new(Arc::clone(&store), config.persistence.snapshot_key.clone());

        Ok(Self {
            resolver: IdentityResolver::new(Arc::new(registry)),
            catalog: Arc::new(catalog),
            snapshots,
            config,
        })
    }

    /// Build the upload manager and bring back jobs from the last run.
    pub async fn manager(&self) -> Result<UploadManager, AppError> {
        let auth = Arc::new(StaticTokenAuth::new(self.config.storage.http.access_token.clone()));
        let object_store = providers::from_config(&self.config.storage, auth).await?;
        info!(provider = object_store.provider_type(), "Object store ready");

        let client = AssetUploadClient::new(object_store, self.config.upload.clone())
            .with_catalog(self.catalog.clone());
        let manager = UploadManager::new(
            client,
            self.resolver.clone(),
            Some(self.snapshots.clone()),
        )?;

        match manager.restore() {
            Ok(0) => {}
            Ok(restored) => info!(restored, "Loaded upload jobs from the previous run"),
            Err(e) => warn!(error = %e, "Ignoring unreadable upload snapshot"),
        }
        Ok(manager)
    }
}

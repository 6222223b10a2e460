//! Command line runner for lambo-migrate
//!
//! The `lambo-migrate` binary runs SQL migrations only. Applications with
//! Rust migrations call [`run_with_registry`] from their own binary so the
//! compiled migrations are available to the loader.

pub mod commands;
pub mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lambo_migrate::{AppConfig, MigrationRegistry};

use crate::logging::{init_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "lambo-migrate")]
#[command(about = "Apply, revert and inspect database schema migrations")]
#[command(version)]
pub struct Cli {
    /// Directory holding the migration files
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Database connection URL (defaults to DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Name of the ledger table
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Skip unapplied migrations older than the latest applied one instead of failing
    #[arg(long, global = true)]
    pub allow_out_of_order: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Apply all pending migrations
    #[command(visible_aliases = ["up", "u"])]
    Update,

    /// Revert the most recently applied migration
    #[command(visible_aliases = ["down", "d"])]
    Downgrade,

    /// Check that every applied migration has a local file
    Validate,

    /// Show the state of every migration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    #[command(visible_alias = "c")]
    Create {
        /// Migration name; spaces become underscores
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,

        /// File type of the new migration (sql or rs)
        #[arg(long)]
        ext: Option<String>,
    },
}

impl Cli {
    /// Apply command line overrides on top of the environment configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.dir {
            config.migration.migrations_dir = dir.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(table) = &self.table {
            config.migration.migrations_table = table.clone();
        }
        if self.allow_out_of_order {
            config.migration.allow_out_of_order = true;
        }
        if let Commands::Create { ext: Some(ext), .. } = &self.command {
            config.migration.extension = ext.trim_start_matches('.').to_string();
        }
    }
}

/// Resolve the configuration for `cli` from the environment and its flags
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Run a parsed command
pub async fn execute(
    command: Commands,
    config: &AppConfig,
    registry: MigrationRegistry,
) -> anyhow::Result<()> {
    match command {
        Commands::Update => commands::migrate::update(config, registry).await,
        Commands::Downgrade => commands::migrate::downgrade(config, registry).await,
        Commands::Validate => commands::migrate::validate(config, registry).await,
        Commands::Status { json } => commands::migrate::status(config, registry, json).await,
        Commands::Create { name, .. } => commands::migrate::create(config, &name.join(" ")),
    }
}

/// Parse the process arguments and run them with the given Rust migrations
///
/// A `.env` file in the working directory is loaded first.
pub async fn run_with_registry(registry: MigrationRegistry) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(&LoggingConfig::from_app_config(&config))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    execute(cli.command, &config, registry).await
}

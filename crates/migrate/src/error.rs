//! Error types for the migration engine
//!
//! Every failure the engine can report is a distinct variant, so callers
//! match on the kind instead of inspecting messages.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migrations path `{}` is not a directory", path.display())]
    InvalidPath { path: PathBuf },

    #[error("Malformed migration file name `{file_name}`: {reason}")]
    MalformedName { file_name: String, reason: String },

    #[error("`{name}` is not a migration module: {reason}")]
    NotAMigrationModule { name: String, reason: String },

    #[error("A migration named `{name}` already exists")]
    DuplicateName {
        name: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("There are no migrations to downgrade")]
    NothingToDowngrade,

    #[error("Migration {name} (created on {timestamp}) couldn't be found in local files")]
    RecordNotFoundLocally {
        name: String,
        timestamp: NaiveDateTime,
    },

    #[error("Migration `{name}` wasn't created by the database")]
    UnpersistedRecord { name: String },

    #[error(
        "Migrations older than the latest applied one ({latest}) were never applied: {}",
        names.join(", ")
    )]
    OutOfOrder { latest: String, names: Vec<String> },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MigrationError {
    /// Create a new malformed name error
    pub fn malformed_name(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedName {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new "not a migration module" error
    pub fn not_a_module(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotAMigrationModule {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate name error that was detected before touching the database
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName {
            name: name.into(),
            source: None,
        }
    }

    /// Check whether this error came out of the database driver
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::DuplicateName { source: Some(_), .. }
        )
    }
}

//! # lambo-migrate: Schema Migrations
//!
//! Tracks, applies and reverts ordered schema changes. Migration files live
//! in a directory and are named `<unix-timestamp>_<name>.<ext>`; a ledger
//! table records which of them have been applied.
//!
//! SQL migrations are plain files with `-- up` and `-- down` sections. Rust
//! migrations implement [`Migration`] and are registered by name in a
//! [`MigrationRegistry`].

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{
    connect, mask_database_url, DatabaseBackendType, DatabasePool, DatabasePoolConfig,
    DatabaseRow, DatabaseTransaction, DatabaseValue, Executor, SqlDialect,
};
pub use config::{AppConfig, ConfigError, MigrationConfig};
pub use error::{MigrationError, MigrationResult};
pub use migrations::*;

/// Everything a Rust migration file needs
pub mod prelude {
    pub use crate::backends::{DatabaseValue, Executor};
    pub use crate::error::{MigrationError, MigrationResult};
    pub use crate::migrations::{Migration, MigrationRollback};
    pub use async_trait::async_trait;
}

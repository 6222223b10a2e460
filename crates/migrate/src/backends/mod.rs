//! Database Backend Abstractions
//!
//! This module provides the transactional executor abstraction the migration
//! engine runs on, with PostgreSQL and SQLite implementations.

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresPool;
pub use sqlite::SqliteBackendPool;

use crate::config::ConfigError;
use crate::error::MigrationResult;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn detect_from_url(url: &str) -> Result<Self, ConfigError> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(ConfigError::invalid_value(
                "database_url",
                mask_database_url(url),
                "a postgres://, postgresql:// or sqlite: URL",
            ))
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Create a connection pool using the appropriate backend for the given URL
pub async fn connect(
    database_url: &str,
    config: &DatabasePoolConfig,
) -> MigrationResult<Arc<dyn DatabasePool>> {
    let backend = DatabaseBackendType::detect_from_url(database_url)?;
    tracing::debug!(
        backend = %backend,
        url = %mask_database_url(database_url),
        "Connecting to database"
    );

    let pool: Arc<dyn DatabasePool> = match backend {
        DatabaseBackendType::PostgreSQL => {
            Arc::new(PostgresPool::connect(database_url, config).await?)
        }
        DatabaseBackendType::SQLite => {
            Arc::new(SqliteBackendPool::connect(database_url, config).await?)
        }
    };

    Ok(pool)
}

/// Safely mask the password in a database URL for display
pub fn mask_database_url(database_url: &str) -> String {
    url::Url::parse(database_url)
        .map(|mut url| {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        })
        .unwrap_or_else(|_| "<unparseable database url>".to_string())
}

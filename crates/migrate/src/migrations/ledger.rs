//! Migration Ledger - The table of applied migrations
//!
//! Every method runs on the executor it is given, so ledger writes share the
//! transaction of the migration they describe.

use super::definitions::MigrationRecord;
use crate::backends::{DatabaseRow, DatabaseValue, Executor, SqlDialect};
use crate::error::{MigrationError, MigrationResult};

/// Reads and writes the table recording applied migrations
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    dialect: SqlDialect,
}

impl Ledger {
    /// Create a ledger over `table`
    ///
    /// The table name is interpolated into SQL and must be a plain identifier,
    /// which `MigrationConfig::validate` checks.
    pub fn new(table: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Create the ledger table if it doesn't exist yet
    pub async fn ensure_schema(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id {primary_key}, \
             name TEXT NOT NULL CONSTRAINT {table}_name_unique UNIQUE, \
             timestamp TIMESTAMP NOT NULL)",
            table = self.table,
            primary_key = self.dialect.serial_primary_key(),
        );

        executor.execute(&sql, &[]).await?;
        Ok(())
    }

    /// The most recently created applied migration, if any
    pub async fn latest(
        &self,
        executor: &mut dyn Executor,
    ) -> MigrationResult<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, timestamp FROM {} ORDER BY timestamp DESC, name DESC LIMIT 1",
            self.table
        );

        let row = executor.fetch_optional(&sql, &[]).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Every applied migration, newest first
    pub async fn all(&self, executor: &mut dyn Executor) -> MigrationResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT id, name, timestamp FROM {} ORDER BY timestamp DESC, name DESC",
            self.table
        );

        let rows = executor.fetch_all(&sql, &[]).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Insert a ledger row for `migration`, returning it with its new id
    pub async fn record(
        &self,
        executor: &mut dyn Executor,
        migration: &MigrationRecord,
    ) -> MigrationResult<MigrationRecord> {
        let sql = format!(
            "INSERT INTO {} (name, timestamp) VALUES ({}, {}) RETURNING id",
            self.table,
            self.dialect.parameter_placeholder(0),
            self.dialect.parameter_placeholder(1),
        );
        let params = [
            DatabaseValue::from(migration.name.as_str()),
            DatabaseValue::from(migration.timestamp),
        ];

        let row = match executor.fetch_optional(&sql, &params).await {
            Ok(row) => row,
            Err(MigrationError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                return Err(MigrationError::DuplicateName {
                    name: migration.name.clone(),
                    source: Some(sqlx::Error::Database(db_err)),
                });
            }
            Err(e) => return Err(e),
        };

        let id = row
            .ok_or(sqlx::Error::RowNotFound)?
            .get_i64("id")?;

        tracing::debug!(name = %migration.name, id, "Recorded migration");
        Ok(migration.clone().with_id(id))
    }

    /// Delete the ledger row of `migration`
    pub async fn erase(
        &self,
        executor: &mut dyn Executor,
        migration: &MigrationRecord,
    ) -> MigrationResult<()> {
        let id = migration.id.ok_or_else(|| MigrationError::UnpersistedRecord {
            name: migration.name.clone(),
        })?;

        let sql = format!(
            "DELETE FROM {} WHERE id = {}",
            self.table,
            self.dialect.parameter_placeholder(0)
        );
        let deleted = executor.execute(&sql, &[DatabaseValue::from(id)]).await?;

        if deleted == 0 {
            tracing::warn!(name = %migration.name, id, "Ledger row was already gone");
        }
        Ok(())
    }
}

fn record_from_row(row: &DatabaseRow) -> MigrationResult<MigrationRecord> {
    Ok(MigrationRecord {
        id: Some(row.get_i64("id")?),
        name: row.get_string("name")?,
        timestamp: row.get_timestamp("timestamp")?,
        path: None,
    })
}

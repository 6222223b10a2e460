//! SQLite Backend Implementation
//!
//! Same backend traits as the PostgreSQL implementation, on top of sqlx's
//! SQLite driver. DDL is transactional in SQLite, so a failed migration
//! leaves no schema behind.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use super::core::*;
use crate::error::MigrationResult;

/// SQLite connection pool implementation
pub struct SqliteBackendPool {
    pool: SqlitePool,
}

impl SqliteBackendPool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pool from a database URL
    ///
    /// The pool never retires its connections, so `sqlite::memory:` databases
    /// live as long as the pool does.
    pub async fn connect(database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DatabasePool for SqliteBackendPool {
    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction::new(tx)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl SqliteTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Executor for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut *self.tx).await?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<DatabaseRow>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&mut *self.tx).await?;

        rows.iter().map(sqlite_row_to_database_row).collect()
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<DatabaseRow>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let row = query.fetch_optional(&mut *self.tx).await?;

        row.as_ref().map(sqlite_row_to_database_row).transpose()
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    fn executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Sqlite, SqliteArguments<'a>>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Sqlite, SqliteArguments<'a>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Timestamp(ts) => query.bind(*ts),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(sqlx::types::Json(j.clone())),
    }
}

fn sqlite_row_to_database_row(row: &SqliteRow) -> MigrationResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        columns.push((
            column.name().to_string(),
            sqlite_value_to_database_value(row, index)?,
        ));
    }
    Ok(DatabaseRow::new(columns))
}

/// Convert a SQLite column value to DatabaseValue
///
/// The declared column type decides for booleans and timestamps; everything
/// else follows the storage class of the value itself.
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> MigrationResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let storage_type = raw.type_info().name().to_string();
    let declared_type = row.columns()[index].type_info().name().to_string();

    let value = match (declared_type.as_str(), storage_type.as_str()) {
        ("BOOLEAN", _) => DatabaseValue::Bool(row.try_get(index)?),
        ("DATETIME", _) => DatabaseValue::Timestamp(row.try_get(index)?),
        (_, "INTEGER") => DatabaseValue::Int64(row.try_get(index)?),
        (_, "REAL") => DatabaseValue::Float64(row.try_get(index)?),
        (_, "BLOB") => DatabaseValue::Bytes(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get(index)?),
    };

    Ok(value)
}

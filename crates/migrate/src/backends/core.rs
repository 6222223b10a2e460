//! Core Database Backend Traits
//!
//! This module defines the transactional executor interface the migration
//! engine runs on. Backends implement these traits on top of a concrete
//! driver; the engine and the migrations themselves only see the traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{MigrationError, MigrationResult};

/// Statement execution capability handed to migrations
///
/// This is the "cursor": it can run statements and read rows, but it cannot
/// end the transaction it belongs to.
#[async_trait]
pub trait Executor: Send {
    /// Execute a statement and return the affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<DatabaseRow>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<DatabaseRow>>;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: Executor {
    /// Borrow the statement executor of this transaction
    fn executor(&mut self) -> &mut dyn Executor;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// Get the SQL dialect spoken by this pool
    fn sql_dialect(&self) -> SqlDialect;

    /// Close the pool
    async fn close(&self);
}

/// A fetched row: column names with their decoded values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<(String, DatabaseValue)>) -> Self {
        Self { columns }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> MigrationResult<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
            .ok_or_else(|| sqlx::Error::ColumnNotFound(name.to_string()).into())
    }

    /// Get column count
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Read an integer column, accepting either integer width
    pub fn get_i64(&self, name: &str) -> MigrationResult<i64> {
        match self.get_by_name(name)? {
            DatabaseValue::Int32(value) => Ok(i64::from(*value)),
            DatabaseValue::Int64(value) => Ok(*value),
            other => Err(unexpected_type(name, "integer", other)),
        }
    }

    /// Read a text column
    pub fn get_string(&self, name: &str) -> MigrationResult<String> {
        match self.get_by_name(name)? {
            DatabaseValue::String(value) => Ok(value.clone()),
            other => Err(unexpected_type(name, "text", other)),
        }
    }

    /// Read a timestamp column as a naive (zone-less) timestamp
    pub fn get_timestamp(&self, name: &str) -> MigrationResult<NaiveDateTime> {
        match self.get_by_name(name)? {
            DatabaseValue::Timestamp(value) => Ok(*value),
            DatabaseValue::DateTime(value) => Ok(value.naive_utc()),
            // SQLite hands back text when the column type is unknown
            DatabaseValue::String(value) => {
                NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map_err(|_| {
                        unexpected_type(name, "timestamp", &DatabaseValue::String(value.clone()))
                    })
            }
            other => Err(unexpected_type(name, "timestamp", other)),
        }
    }
}

fn unexpected_type(column: &str, expected: &str, found: &DatabaseValue) -> MigrationError {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("expected {}, found {:?}", expected, found).into(),
    }
    .into()
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for a zero-based parameter index
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => format!("?{}", index + 1),
        }
    }

    /// Get the auto-increment primary key column definition
    pub fn serial_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "SERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        // One runner, one migration at a time.
        Self {
            max_connections: 1,
            acquire_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_row() -> DatabaseRow {
        DatabaseRow::new(vec![
            ("id".to_string(), DatabaseValue::Int32(7)),
            ("name".to_string(), DatabaseValue::from("create_users")),
            (
                "timestamp".to_string(),
                DatabaseValue::Timestamp(
                    DateTime::from_timestamp(100, 0).unwrap().naive_utc(),
                ),
            ),
        ])
    }

    #[test]
    fn test_typed_column_access() {
        let row = ledger_row();
        assert_eq!(row.column_count(), 3);
        assert_eq!(row.column_names(), vec!["id", "name", "timestamp"]);
        assert_eq!(row.get_i64("id").unwrap(), 7);
        assert_eq!(row.get_string("name").unwrap(), "create_users");
        assert_eq!(row.get_timestamp("timestamp").unwrap().and_utc().timestamp(), 100);
    }

    #[test]
    fn test_missing_and_mistyped_columns() {
        let row = ledger_row();
        assert!(matches!(
            row.get_string("nope"),
            Err(MigrationError::Database(sqlx::Error::ColumnNotFound(_)))
        ));
        assert!(matches!(
            row.get_i64("name"),
            Err(MigrationError::Database(sqlx::Error::ColumnDecode { .. }))
        ));
    }

    #[test]
    fn test_timestamp_from_text() {
        let row = DatabaseRow::new(vec![(
            "timestamp".to_string(),
            DatabaseValue::from("1970-01-01 00:01:40"),
        )]);
        assert_eq!(row.get_timestamp("timestamp").unwrap().and_utc().timestamp(), 100);
    }

    #[test]
    fn test_placeholders_per_dialect() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(1), "?2");
    }

    #[test]
    fn test_option_conversion() {
        assert!(DatabaseValue::from(None::<String>).is_null());
        assert_eq!(DatabaseValue::from(Some(3i64)), DatabaseValue::Int64(3));
    }
}

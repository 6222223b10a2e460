//! Migration units and the loader that resolves them from discovered files
//!
//! A migration is any value implementing [`Migration`]. SQL files are parsed
//! into [`SqlScript`]s; Rust migrations are compiled into the application and
//! looked up in a [`MigrationRegistry`] by name.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer, TokenizerError};

use super::definitions::MigrationRecord;
use crate::backends::{Executor, SqlDialect};
use crate::error::{MigrationError, MigrationResult};

/// A reversible schema change
///
/// Both directions run inside the transaction the runner opened for them and
/// only get the statement executor, never the transaction itself.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Apply the change
    async fn up(&self, executor: &mut dyn Executor) -> MigrationResult<()>;

    /// Revert the change
    async fn down(&self, executor: &mut dyn Executor) -> MigrationResult<()>;
}

/// Rust migrations available to the loader, keyed by migration name
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    migrations: HashMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `migration` under the name part of its file name
    pub fn register<M>(&mut self, name: impl Into<String>, migration: M) -> MigrationResult<()>
    where
        M: Migration + 'static,
    {
        let name = name.into();
        if self.migrations.contains_key(&name) {
            return Err(MigrationError::duplicate_name(name));
        }
        self.migrations.insert(name, Arc::new(migration));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<M>(mut self, name: impl Into<String>, migration: M) -> MigrationResult<Self>
    where
        M: Migration + 'static,
    {
        self.register(name, migration)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Migration>> {
        self.migrations.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.migrations.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.migrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.names())
            .finish()
    }
}

/// A migration written as SQL with `-- up` and `-- down` sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    up: Vec<String>,
    down: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlScript {
    /// Parse the contents of a SQL migration file
    ///
    /// Anything above the first marker is ignored. Both markers are required,
    /// each exactly once; either section may be empty.
    pub fn parse(name: &str, content: &str, dialect: SqlDialect) -> MigrationResult<Self> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Preamble;
        let (mut seen_up, mut seen_down) = (false, false);

        for line in content.lines() {
            match section_marker(line) {
                Some(Section::Up) => {
                    if seen_up {
                        return Err(MigrationError::not_a_module(name, "`-- up` appears twice"));
                    }
                    seen_up = true;
                    section = Section::Up;
                    continue;
                }
                Some(Section::Down) => {
                    if seen_down {
                        return Err(MigrationError::not_a_module(name, "`-- down` appears twice"));
                    }
                    seen_down = true;
                    section = Section::Down;
                    continue;
                }
                _ => {}
            }

            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::Preamble => {}
            }
        }

        if !seen_up {
            return Err(MigrationError::not_a_module(name, "missing `-- up` section"));
        }
        if !seen_down {
            return Err(MigrationError::not_a_module(name, "missing `-- down` section"));
        }

        Ok(Self {
            up: split_sql_statements(&up.join("\n"), dialect),
            down: split_sql_statements(&down.join("\n"), dialect),
        })
    }

    pub fn up_statements(&self) -> &[String] {
        &self.up
    }

    pub fn down_statements(&self) -> &[String] {
        &self.down
    }
}

#[async_trait]
impl Migration for SqlScript {
    async fn up(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        for statement in &self.up {
            executor.execute(statement, &[]).await?;
        }
        Ok(())
    }

    async fn down(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        for statement in &self.down {
            executor.execute(statement, &[]).await?;
        }
        Ok(())
    }
}

fn section_marker(line: &str) -> Option<Section> {
    let comment = line.trim().strip_prefix("--")?;
    match comment.trim().to_ascii_lowercase().as_str() {
        "up" => Some(Section::Up),
        "down" => Some(Section::Down),
        _ => None,
    }
}

/// Split SQL into individual statements, keeping each one's original text
///
/// Boundaries are the top-level `;` tokens found by the SQL tokenizer, so
/// quoted strings, dollar-quoted bodies and `BEGIN ... END` blocks of
/// `CREATE TRIGGER` stay whole. SQL the tokenizer can't handle is split on
/// `;` instead.
pub fn split_sql_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let parser_dialect: Box<dyn Dialect> = match dialect {
        SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
        SqlDialect::SQLite => Box::new(SQLiteDialect {}),
    };

    match statement_slices(sql, parser_dialect.as_ref())
        .or_else(|_| statement_slices(sql, &GenericDialect {}))
    {
        Ok(statements) => statements,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(str::trim)
                .filter(|s| has_code(s))
                .map(str::to_string)
                .collect()
        }
    }
}

fn statement_slices(sql: &str, dialect: &dyn Dialect) -> Result<Vec<String>, TokenizerError> {
    let tokens = Tokenizer::new(dialect, sql).tokenize_with_location()?;
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut statements = Vec::new();
    let mut start = 0;
    let mut seen_code = false;
    let mut in_create = false;
    // Open `BEGIN`/`CASE` blocks inside a CREATE statement
    let mut depth = 0usize;

    for token in &tokens {
        match &token.token {
            Token::Whitespace(_) => continue,
            Token::SemiColon if depth == 0 => {
                let Some(offset) = byte_offset(sql, &line_starts, &token.location) else {
                    continue;
                };
                if seen_code {
                    statements.push(sql[start..offset].trim().to_string());
                }
                start = offset + 1;
                seen_code = false;
                in_create = false;
                continue;
            }
            Token::Word(word) => match word.keyword {
                Keyword::CREATE => in_create = true,
                Keyword::BEGIN if in_create => depth += 1,
                Keyword::CASE if depth > 0 => depth += 1,
                Keyword::END if depth > 0 => depth -= 1,
                _ => {}
            },
            _ => {}
        }
        seen_code = true;
    }
    if seen_code {
        statements.push(sql[start..].trim().to_string());
    }

    Ok(statements)
}

/// Byte offset of a tokenizer location (1-based line and character column)
fn byte_offset(sql: &str, line_starts: &[usize], location: &Location) -> Option<usize> {
    let line_start = *line_starts.get(usize::try_from(location.line).ok()?.checked_sub(1)?)?;
    let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map(|(i, _)| line_start + i)
}

fn has_code(sql: &str) -> bool {
    sql.lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("--"))
}

/// Resolves discovered records into runnable migrations
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    registry: Arc<MigrationRegistry>,
    dialect: SqlDialect,
}

impl ModuleLoader {
    pub fn new(registry: impl Into<Arc<MigrationRegistry>>, dialect: SqlDialect) -> Self {
        Self {
            registry: registry.into(),
            dialect,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Load the migration behind a local record
    pub fn load(&self, record: &MigrationRecord) -> MigrationResult<Arc<dyn Migration>> {
        let path = record
            .path
            .as_deref()
            .ok_or_else(|| MigrationError::not_a_module(record.to_string(), "no local file"))?;

        match record.extension() {
            Some("sql") => {
                let content = fs::read_to_string(path)?;
                let script = SqlScript::parse(&record.to_string(), &content, self.dialect)?;
                tracing::debug!(
                    migration = %record,
                    up = script.up_statements().len(),
                    down = script.down_statements().len(),
                    "Loaded SQL migration"
                );
                Ok(Arc::new(script))
            }
            Some("rs") => self.registry.get(&record.name).ok_or_else(|| {
                MigrationError::not_a_module(
                    record.to_string(),
                    format!("no migration registered under `{}`", record.name),
                )
            }),
            other => Err(MigrationError::not_a_module(
                record.to_string(),
                format!("unsupported file extension {:?}", other.unwrap_or("")),
            )),
        }
    }

    /// Load every record, failing on the first one that isn't a migration
    pub fn load_all(
        &self,
        records: &[MigrationRecord],
    ) -> MigrationResult<Vec<(MigrationRecord, Arc<dyn Migration>)>> {
        records
            .iter()
            .map(|record| Ok((record.clone(), self.load(record)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Noop;

    #[async_trait]
    impl Migration for Noop {
        async fn up(&self, _executor: &mut dyn Executor) -> MigrationResult<()> {
            Ok(())
        }

        async fn down(&self, _executor: &mut dyn Executor) -> MigrationResult<()> {
            Ok(())
        }
    }

    const SCRIPT: &str = "\
-- Migration: create users

-- up
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE INDEX users_name ON users (name);

-- down
DROP TABLE users;
";

    #[test]
    fn test_sql_script_sections() {
        let script = SqlScript::parse("100_users", SCRIPT, SqlDialect::SQLite).unwrap();
        assert_eq!(script.up_statements().len(), 2);
        assert_eq!(script.down_statements(), ["DROP TABLE users".to_string()]);
    }

    #[test]
    fn test_sql_script_requires_both_markers() {
        let missing_down = "-- up\nCREATE TABLE t (id INTEGER);\n";
        assert!(matches!(
            SqlScript::parse("100_t", missing_down, SqlDialect::SQLite),
            Err(MigrationError::NotAMigrationModule { .. })
        ));

        let doubled = "-- up\n-- down\n-- up\n";
        assert!(matches!(
            SqlScript::parse("100_t", doubled, SqlDialect::SQLite),
            Err(MigrationError::NotAMigrationModule { .. })
        ));
    }

    #[test]
    fn test_empty_sections_are_allowed() {
        let content = "-- UP\n-- add statements here\n--down\n";
        let script = SqlScript::parse("100_t", content, SqlDialect::PostgreSQL).unwrap();
        assert!(script.up_statements().is_empty());
        assert!(script.down_statements().is_empty());
    }

    #[test]
    fn test_statements_keep_their_original_text() {
        let statements = split_sql_statements(
            "CREATE TABLE t (id INTEGER);\n-- seed\nINSERT INTO t VALUES ( 1 );\n",
            SqlDialect::SQLite,
        );
        assert_eq!(
            statements,
            vec!["CREATE TABLE t (id INTEGER)", "-- seed\nINSERT INTO t VALUES ( 1 )"]
        );
    }

    #[test]
    fn test_plpgsql_function_stays_whole() {
        let function = "\
CREATE FUNCTION touch_updated_at() RETURNS trigger AS $$
BEGIN
  NEW.updated_at = now();
  RETURN NEW;
END;
$$ LANGUAGE plpgsql";
        let trigger = "CREATE TRIGGER users_touch BEFORE UPDATE ON users \
FOR EACH ROW EXECUTE FUNCTION touch_updated_at()";
        let sql = format!("{};\n{};\n", function, trigger);

        let statements = split_sql_statements(&sql, SqlDialect::PostgreSQL);
        assert_eq!(statements, vec![function.to_string(), trigger.to_string()]);
    }

    #[test]
    fn test_sqlite_trigger_body_stays_whole() {
        let trigger = "\
CREATE TRIGGER t_ai AFTER INSERT ON t BEGIN
  UPDATE t SET n = 1;
  UPDATE t SET m = CASE WHEN m IS NULL THEN 2 ELSE m END;
END";
        let sql = format!(
            "CREATE TABLE t (n INTEGER, m INTEGER);\n{};\nDROP TABLE x;",
            trigger
        );

        let statements = split_sql_statements(&sql, SqlDialect::SQLite);
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE t (n INTEGER, m INTEGER)".to_string(),
                trigger.to_string(),
                "DROP TABLE x".to_string(),
            ]
        );
    }

    #[test]
    fn test_semicolons_in_strings_are_not_boundaries() {
        let statements = split_sql_statements(
            "INSERT INTO notes (body) VALUES ('a; b');\nSELECT 1;",
            SqlDialect::SQLite,
        );
        assert_eq!(
            statements,
            vec!["INSERT INTO notes (body) VALUES ('a; b')", "SELECT 1"]
        );
    }

    #[test]
    fn test_untokenizable_sql_falls_back_to_semicolons() {
        let statements = split_sql_statements("SELECT 'oops; SELECT 1", SqlDialect::SQLite);
        assert_eq!(statements, vec!["SELECT 'oops", "SELECT 1"]);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = MigrationRegistry::new();
        registry.register("seed_users", Noop).unwrap();
        assert!(matches!(
            registry.register("seed_users", Noop),
            Err(MigrationError::DuplicateName { .. })
        ));
        assert_eq!(registry.names(), vec!["seed_users"]);
    }

    #[test]
    fn test_loader_resolves_files_and_registry_entries() {
        let dir = TempDir::new().unwrap();
        let sql_path = dir.path().join("100_users.sql");
        fs::write(&sql_path, SCRIPT).unwrap();

        let registry = MigrationRegistry::new().with("seed_users", Noop).unwrap();
        let loader = ModuleLoader::new(registry, SqlDialect::SQLite);

        let sql = MigrationRecord::new(100, "users").unwrap().with_path(sql_path.clone());
        assert!(loader.load(&sql).is_ok());

        let registered = MigrationRecord::new(200, "seed_users")
            .unwrap()
            .with_path(dir.path().join("200_seed_users.rs"));
        assert!(loader.load(&registered).is_ok());

        let unregistered = MigrationRecord::new(300, "other")
            .unwrap()
            .with_path(dir.path().join("300_other.rs"));
        assert!(matches!(
            loader.load(&unregistered),
            Err(MigrationError::NotAMigrationModule { .. })
        ));

        let pathless = MigrationRecord::new(400, "ghost").unwrap();
        assert!(matches!(
            loader.load(&pathless),
            Err(MigrationError::NotAMigrationModule { .. })
        ));
    }
}

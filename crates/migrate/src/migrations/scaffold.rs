//! Migration scaffolding - Creating new migration files from templates

use std::fs;
use std::path::PathBuf;

use chrono::Utc;

use super::definitions::MigrationRecord;
use super::discovery::Discovery;
use crate::config::{ConfigError, MigrationConfig};
use crate::error::{MigrationError, MigrationResult};

/// Create a new migration file in the configured directory
///
/// The name has spaces replaced by underscores and must then consist of
/// letters and underscores only. Returns the path of the new file.
pub fn create_migration(config: &MigrationConfig, name: &str) -> MigrationResult<PathBuf> {
    create_migration_at(config, name, Utc::now().timestamp())
}

/// Same as [`create_migration`], with an explicit unix timestamp
pub fn create_migration_at(
    config: &MigrationConfig,
    name: &str,
    timestamp: i64,
) -> MigrationResult<PathBuf> {
    let extension = config.extension.as_str();
    let name = sanitize_name(name, extension);

    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
        || !name.chars().any(|c| c.is_ascii_alphabetic())
    {
        return Err(MigrationError::malformed_name(
            format!("{}_{}.{}", timestamp, name, extension),
            "a migration name may only contain letters, spaces and underscores",
        ));
    }

    let dir = &config.migrations_dir;
    if dir.exists() && !dir.is_dir() {
        return Err(MigrationError::InvalidPath { path: dir.clone() });
    }
    fs::create_dir_all(dir)?;

    let existing = Discovery::new()?.discover(dir)?;
    if existing.iter().any(|record| record.name == name) {
        return Err(MigrationError::duplicate_name(name));
    }

    let record = MigrationRecord::new(timestamp, name)?;
    let template = match extension {
        "sql" => sql_template(&record),
        "rs" => rust_template(&record),
        other => {
            return Err(ConfigError::invalid_value("extension", other, "one of: sql, rs").into());
        }
    };

    let path = dir.join(record.file_name(extension));
    fs::write(&path, template)?;

    tracing::info!(path = %path.display(), "Created migration file");
    Ok(path)
}

fn sanitize_name(raw: &str, extension: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_suffix(&format!(".{}", extension))
        .unwrap_or(raw);
    raw.replace(' ', "_")
}

fn sql_template(record: &MigrationRecord) -> String {
    format!(
        "-- Migration: {}\n\
         -- Created: {}\n\
         \n\
         -- up\n\
         \n\
         \n\
         -- down\n\
         \n",
        record.name,
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn rust_template(record: &MigrationRecord) -> String {
    let type_name: String = record
        .name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    let module_name = record.name.to_ascii_lowercase();

    format!(
        r#"//! Migration: {name}
//!
//! Compile this file into the application and register it under its name:
//!
//! ```ignore
//! #[path = "../migrations/{file}"]
//! mod {module};
//!
//! registry.register("{name}", {module}::{ty})?;
//! ```

use lambo_migrate::prelude::*;

pub struct {ty};

#[async_trait]
impl Migration for {ty} {{
    async fn up(&self, _executor: &mut dyn Executor) -> MigrationResult<()> {{
        Ok(())
    }}

    async fn down(&self, _executor: &mut dyn Executor) -> MigrationResult<()> {{
        Ok(())
    }}
}}
"#,
        name = record.name,
        file = record.file_name("rs"),
        module = module_name,
        ty = type_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, extension: &str) -> MigrationConfig {
        MigrationConfig {
            migrations_dir: dir.path().join("migrations"),
            extension: extension.to_string(),
            ..MigrationConfig::default()
        }
    }

    #[test]
    fn test_create_sanitizes_and_writes_template() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "sql");

        let path = create_migration_at(&config, "My Migration", 1_700_000_000).unwrap();
        assert_eq!(path.file_name().unwrap(), "1700000000_My_Migration.sql");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("-- up"));
        assert!(content.contains("-- down"));
    }

    #[test]
    fn test_create_twice_is_a_duplicate() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "sql");

        create_migration_at(&config, "My Migration", 100).unwrap();
        assert!(matches!(
            create_migration_at(&config, "My Migration", 200),
            Err(MigrationError::DuplicateName { source: None, .. })
        ));
    }

    #[test]
    fn test_create_strips_extension() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "rs");

        let path = create_migration_at(&config, "seed users.rs", 100).unwrap();
        assert_eq!(path.file_name().unwrap(), "100_seed_users.rs");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("pub struct SeedUsers;"));
        assert!(content.contains("impl Migration for SeedUsers"));
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "sql");

        for name in ["add-users", "v2", "", "   "] {
            assert!(
                matches!(
                    create_migration_at(&config, name, 100),
                    Err(MigrationError::MalformedName { .. })
                ),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn test_create_rejects_file_as_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not_a_dir");
        fs::write(&file, "").unwrap();

        let config = MigrationConfig {
            migrations_dir: file,
            ..MigrationConfig::default()
        };
        assert!(matches!(
            create_migration_at(&config, "a", 100),
            Err(MigrationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_created_file_is_discoverable() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, "sql");

        create_migration_at(&config, "a", 100).unwrap();
        create_migration_at(&config, "b", 200).unwrap();

        let records = Discovery::new().unwrap().discover(&config.migrations_dir).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, vec!["100_a", "200_b"]);
    }
}

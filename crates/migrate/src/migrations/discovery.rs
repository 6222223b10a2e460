//! Migration Discovery - Finding migration files on disk
//!
//! A migration file is named `<unix-timestamp>_<name>.<ext>`, where the name
//! is made of ASCII letters and underscores and the extension is one the
//! module loader understands. Files that don't start with a numeric prefix
//! are not migrations and are ignored. Files that do, but break the rest of
//! the pattern, are reported as malformed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;

use super::definitions::MigrationRecord;
use crate::config::SUPPORTED_EXTENSIONS;
use crate::error::{MigrationError, MigrationResult};

/// Scans a directory for migration files
#[derive(Debug, Clone)]
pub struct Discovery {
    file_pattern: Regex,
    candidate_pattern: Regex,
}

impl Discovery {
    pub fn new() -> MigrationResult<Self> {
        let extensions = SUPPORTED_EXTENSIONS.join("|");

        let file_pattern = Regex::new(&format!(r"^(\d+)_([A-Za-z_]+)\.({})$", extensions))
            .map_err(|e| anyhow::anyhow!("Invalid migration file pattern: {}", e))?;
        let candidate_pattern = Regex::new(&format!(r"^\d+_.*\.({})$", extensions))
            .map_err(|e| anyhow::anyhow!("Invalid migration candidate pattern: {}", e))?;

        Ok(Self {
            file_pattern,
            candidate_pattern,
        })
    }

    /// Return all migrations found in `dir`, sorted by timestamp then name
    pub fn discover(&self, dir: &Path) -> MigrationResult<Vec<MigrationRecord>> {
        if !dir.is_dir() {
            return Err(MigrationError::InvalidPath {
                path: dir.to_path_buf(),
            });
        }

        let mut migrations = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            let Some(record) = self.parse_file_name(file_name)? else {
                continue;
            };

            if let Some(previous) = seen.insert(record.name.clone(), file_name.to_string()) {
                tracing::error!(
                    name = %record.name,
                    first = %previous,
                    second = %file_name,
                    "Two migration files share a name"
                );
                return Err(MigrationError::duplicate_name(record.name));
            }

            migrations.push(record.with_path(path));
        }

        migrations.sort();
        tracing::debug!(dir = %dir.display(), count = migrations.len(), "Discovered migrations");
        Ok(migrations)
    }

    /// Parse a file name into a record without a path
    ///
    /// Returns `Ok(None)` for files that are not migrations at all.
    pub fn parse_file_name(&self, file_name: &str) -> MigrationResult<Option<MigrationRecord>> {
        if !self.candidate_pattern.is_match(file_name) {
            return Ok(None);
        }

        let captures = self.file_pattern.captures(file_name).ok_or_else(|| {
            MigrationError::malformed_name(
                file_name,
                "expected `<unix-timestamp>_<name>.<ext>` with a name of letters and underscores",
            )
        })?;

        let timestamp: i64 = captures[1].parse().map_err(|_| {
            MigrationError::malformed_name(file_name, "timestamp doesn't fit in 64 bits")
        })?;

        MigrationRecord::new(timestamp, &captures[2]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        fs::write(dir.path().join(name), "").unwrap();
    }

    #[test]
    fn test_parse_and_format_round_trip() {
        let discovery = Discovery::new().unwrap();

        for file_name in ["100_a.sql", "1700000000_add_giveaways.rs", "5_Mixed_Case.sql"] {
            let record = discovery.parse_file_name(file_name).unwrap().unwrap();
            let extension = file_name.rsplit('.').next().unwrap();
            assert_eq!(record.file_name(extension), file_name);
        }
    }

    #[test]
    fn test_non_migrations_are_ignored() {
        let discovery = Discovery::new().unwrap();

        for file_name in ["README.md", "mod.rs", "schema.sql", "100_a.txt", "_100_a.sql"] {
            assert!(discovery.parse_file_name(file_name).unwrap().is_none(), "{}", file_name);
        }
    }

    #[test]
    fn test_partial_matches_are_malformed() {
        let discovery = Discovery::new().unwrap();

        for file_name in [
            "100_add-users.sql",
            "100_v2.sql",
            "100_.rs",
            "99999999999999999999_a.sql",
        ] {
            assert!(
                matches!(
                    discovery.parse_file_name(file_name),
                    Err(MigrationError::MalformedName { .. })
                ),
                "{}",
                file_name
            );
        }
    }

    #[test]
    fn test_discover_sorts_by_timestamp_then_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "300_c.sql");
        touch(&dir, "100_b.sql");
        touch(&dir, "100_a.rs");
        touch(&dir, "notes.txt");
        fs::create_dir(dir.path().join("200_nested.sql")).unwrap();

        let records = Discovery::new().unwrap().discover(dir.path()).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();

        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(records.iter().all(|r| r.path.is_some()));
        assert_eq!(records[0].extension(), Some("rs"));
    }

    #[test]
    fn test_discover_rejects_non_directories() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "100_a.sql");

        let discovery = Discovery::new().unwrap();
        assert!(matches!(
            discovery.discover(&dir.path().join("100_a.sql")),
            Err(MigrationError::InvalidPath { .. })
        ));
        assert!(matches!(
            discovery.discover(&dir.path().join("missing")),
            Err(MigrationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_discover_surfaces_malformed_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "100_a.sql");
        touch(&dir, "200_bad name.sql");

        assert!(matches!(
            Discovery::new().unwrap().discover(dir.path()),
            Err(MigrationError::MalformedName { .. })
        ));
    }

    #[test]
    fn test_discover_rejects_duplicate_names() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "100_a.sql");
        touch(&dir, "200_a.rs");

        assert!(matches!(
            Discovery::new().unwrap().discover(dir.path()),
            Err(MigrationError::DuplicateName { source: None, .. })
        ));
    }
}

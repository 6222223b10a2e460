//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system:
//! the migration record shared by local discovery and the ledger, and the
//! reports returned by each runner operation.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::error::{MigrationError, MigrationResult};

/// A migration, either discovered in local files or read from the ledger
///
/// Local records carry a `path`, ledger records carry an `id`. Ordering is by
/// timestamp, then by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// Surrogate key of the ledger row, if this record was read from the ledger
    pub id: Option<i64>,
    /// Name component of the file name, unique across the ledger
    pub name: String,
    /// Creation time taken from the numeric file name prefix
    pub timestamp: NaiveDateTime,
    /// Location of the migration file, if resolved against local files
    pub path: Option<PathBuf>,
}

impl MigrationRecord {
    /// Create a record from a unix timestamp (seconds) and a name
    pub fn new(unix_timestamp: i64, name: impl Into<String>) -> MigrationResult<Self> {
        let name = name.into();
        let timestamp = DateTime::from_timestamp(unix_timestamp, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| {
                MigrationError::malformed_name(
                    format!("{}_{}", unix_timestamp, name),
                    "timestamp is out of range",
                )
            })?;

        Ok(Self {
            id: None,
            name,
            timestamp,
            path: None,
        })
    }

    /// Attach the local file this record was discovered from
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach the ledger surrogate key
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Seconds since the unix epoch
    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.and_utc().timestamp()
    }

    /// File stem of this migration: `<unix-timestamp>_<name>`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.unix_timestamp(), self.name)
    }

    /// Full file name of this migration for the given extension
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.file_stem(), extension)
    }

    /// Extension of the local file, if any
    pub fn extension(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
    }

    /// Whether both records describe the same migration (same name and timestamp)
    pub fn same_migration(&self, other: &MigrationRecord) -> bool {
        self.name == other.name && self.timestamp == other.timestamp
    }

    /// Find the local record matching this one
    pub fn find_local<'a>(&self, local: &'a [MigrationRecord]) -> Option<&'a MigrationRecord> {
        local.iter().find(|candidate| candidate.same_migration(self))
    }

    /// Resolve this (ledger) record's path against local records
    pub fn resolve_local(&self, local: &[MigrationRecord]) -> MigrationResult<MigrationRecord> {
        let matching = self.find_local(local).ok_or_else(|| {
            MigrationError::RecordNotFoundLocally {
                name: self.name.clone(),
                timestamp: self.timestamp,
            }
        })?;

        Ok(MigrationRecord {
            path: matching.path.clone(),
            ..self.clone()
        })
    }

    /// The newest local record ordered strictly before this one
    pub fn first_older<'a>(&self, local: &'a [MigrationRecord]) -> Option<&'a MigrationRecord> {
        local.iter().filter(|candidate| *candidate < self).max()
    }
}

impl Ord for MigrationRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for MigrationRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_stem())
    }
}

/// Result of running migrations
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Migrations found to be pending, in the order they were attempted
    pub pending: Vec<MigrationRecord>,
    /// Migrations that were applied and committed
    pub applied: Vec<MigrationRecord>,
    /// Unapplied migrations older than the latest applied one, left alone
    pub skipped: Vec<MigrationRecord>,
    /// Total execution time
    pub elapsed: Duration,
}

impl UpdateReport {
    /// Whether the run had nothing to do
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Result of rolling back the latest migration
#[derive(Debug)]
pub struct DowngradeReport {
    /// The migration whose `down` was executed and whose ledger row was removed
    pub reverted: MigrationRecord,
    /// The local migration the schema now corresponds to
    ///
    /// Equal to `reverted` when no older local migration exists.
    pub target: MigrationRecord,
    /// Total execution time
    pub elapsed: Duration,
}

impl DowngradeReport {
    /// Whether the reverted migration was the only one left
    pub fn reverted_to_empty(&self) -> bool {
        self.target.same_migration(&self.reverted)
    }
}

/// Reconciliation outcome for one ledger record
#[derive(Debug, Clone)]
pub struct ValidationEntry {
    pub record: MigrationRecord,
    pub local_path: Option<PathBuf>,
}

impl ValidationEntry {
    pub fn is_matched(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Result of cross-checking the ledger against local files
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// One entry per ledger record, newest first
    pub entries: Vec<ValidationEntry>,
    /// Local migrations older than the latest applied one that were never applied
    pub out_of_order: Vec<MigrationRecord>,
}

impl ValidationReport {
    /// Ledger records with no local file
    pub fn unmatched(&self) -> Vec<&MigrationRecord> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_matched())
            .map(|entry| &entry.record)
            .collect()
    }

    /// Whether every ledger record has a local file
    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(ValidationEntry::is_matched)
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration has been applied
    Applied,
    /// Migration will be applied by the next update
    Pending,
    /// Migration is older than the latest applied one and was never applied
    Skipped,
    /// Migration is in the ledger but its file is gone
    Missing,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            MigrationStatus::Applied => "applied",
            MigrationStatus::Pending => "pending",
            MigrationStatus::Skipped => "skipped",
            MigrationStatus::Missing => "missing",
        };
        write!(f, "{}", status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_breaks_ties_by_name() {
        let mut records = vec![
            MigrationRecord::new(200, "b").unwrap(),
            MigrationRecord::new(100, "z").unwrap(),
            MigrationRecord::new(100, "a").unwrap(),
        ];
        records.sort();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "z", "b"]);
    }

    #[test]
    fn test_file_name_formatting() {
        let record = MigrationRecord::new(1_700_000_000, "add_giveaways").unwrap();
        assert_eq!(record.file_stem(), "1700000000_add_giveaways");
        assert_eq!(record.file_name("sql"), "1700000000_add_giveaways.sql");
        assert_eq!(record.to_string(), "1700000000_add_giveaways");
    }

    #[test]
    fn test_resolve_local_copies_path_and_keeps_id() {
        let local = vec![
            MigrationRecord::new(100, "a").unwrap().with_path("migrations/100_a.sql"),
            MigrationRecord::new(200, "b").unwrap().with_path("migrations/200_b.sql"),
        ];
        let ledger = MigrationRecord::new(200, "b").unwrap().with_id(2);

        let resolved = ledger.resolve_local(&local).unwrap();
        assert_eq!(resolved.id, Some(2));
        assert_eq!(resolved.path, Some(PathBuf::from("migrations/200_b.sql")));
        assert_eq!(resolved.extension(), Some("sql"));
    }

    #[test]
    fn test_resolve_local_requires_same_timestamp() {
        let local = vec![MigrationRecord::new(100, "a").unwrap()];
        let ledger = MigrationRecord::new(101, "a").unwrap().with_id(1);

        assert!(matches!(
            ledger.resolve_local(&local),
            Err(MigrationError::RecordNotFoundLocally { .. })
        ));
    }

    #[test]
    fn test_first_older() {
        let local = vec![
            MigrationRecord::new(100, "a").unwrap(),
            MigrationRecord::new(200, "b").unwrap(),
            MigrationRecord::new(300, "c").unwrap(),
        ];

        let c = MigrationRecord::new(300, "c").unwrap();
        assert_eq!(c.first_older(&local).unwrap().name, "b");

        let a = MigrationRecord::new(100, "a").unwrap();
        assert!(a.first_older(&local).is_none());
    }

    #[test]
    fn test_first_older_within_the_same_second() {
        let local = vec![
            MigrationRecord::new(100, "a").unwrap(),
            MigrationRecord::new(200, "a").unwrap(),
            MigrationRecord::new(200, "b").unwrap(),
        ];

        let b = MigrationRecord::new(200, "b").unwrap();
        let older = b.first_older(&local).unwrap();
        assert_eq!((older.unix_timestamp(), older.name.as_str()), (200, "a"));
    }

    #[test]
    fn test_validation_report_helpers() {
        let report = ValidationReport {
            entries: vec![
                ValidationEntry {
                    record: MigrationRecord::new(200, "b").unwrap(),
                    local_path: None,
                },
                ValidationEntry {
                    record: MigrationRecord::new(100, "a").unwrap(),
                    local_path: Some(PathBuf::from("100_a.sql")),
                },
            ],
            out_of_order: Vec::new(),
        };

        assert!(!report.is_consistent());
        let unmatched = report.unmatched();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].name, "b");
    }
}

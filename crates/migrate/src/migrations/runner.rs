//! Migration Runner - Executes migrations against the database
//!
//! Applies pending migrations one transaction at a time, and cross-checks
//! the ledger against local files. Downgrades live in `rollback.rs`.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use super::definitions::{
    MigrationRecord, MigrationStatus, UpdateReport, ValidationEntry, ValidationReport,
};
use super::discovery::Discovery;
use super::ledger::Ledger;
use super::module::{Migration, MigrationRegistry, ModuleLoader};
use crate::backends::{self, DatabasePool, DatabasePoolConfig, DatabaseTransaction};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};

/// Local files and ledger contents, read at the start of an operation
#[derive(Debug)]
pub(crate) struct MigrationPlan {
    /// Local records, oldest first
    pub local: Vec<MigrationRecord>,
    /// Ledger records, newest first
    pub applied: Vec<MigrationRecord>,
    pub latest: Option<MigrationRecord>,
    /// Local records ordered after `latest` (timestamp, then name), oldest first
    pub pending: Vec<MigrationRecord>,
    /// Unapplied local records not newer than `latest`
    pub out_of_order: Vec<MigrationRecord>,
}

impl MigrationPlan {
    fn new(
        local: Vec<MigrationRecord>,
        latest: Option<MigrationRecord>,
        applied: Vec<MigrationRecord>,
    ) -> Self {
        let (pending, out_of_order) = match &latest {
            None => (local.clone(), Vec::new()),
            Some(latest) => {
                let (newer, older): (Vec<_>, Vec<_>) = local
                    .iter()
                    .cloned()
                    .partition(|record| record > latest);
                let unapplied = older
                    .into_iter()
                    .filter(|record| !applied.iter().any(|a| a.same_migration(record)))
                    .collect();
                (newer, unapplied)
            }
        };

        Self {
            local,
            applied,
            latest,
            pending,
            out_of_order,
        }
    }
}

/// Runs migrations from a directory against one database
pub struct Migrator {
    config: MigrationConfig,
    pool: Arc<dyn DatabasePool>,
    ledger: Ledger,
    loader: ModuleLoader,
    discovery: Discovery,
}

impl Migrator {
    /// Create a migrator from its collaborators
    pub fn new(
        config: MigrationConfig,
        pool: Arc<dyn DatabasePool>,
        ledger: Ledger,
        loader: ModuleLoader,
    ) -> MigrationResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            pool,
            ledger,
            loader,
            discovery: Discovery::new()?,
        })
    }

    /// Create a migrator whose ledger and loader follow the pool's dialect
    pub fn with_registry(
        config: MigrationConfig,
        pool: Arc<dyn DatabasePool>,
        registry: MigrationRegistry,
    ) -> MigrationResult<Self> {
        let dialect = pool.sql_dialect();
        let ledger = Ledger::new(config.migrations_table.clone(), dialect);
        let loader = ModuleLoader::new(registry, dialect);
        Self::new(config, pool, ledger, loader)
    }

    /// Connect to `database_url` and create a migrator for it
    pub async fn connect(
        database_url: &str,
        config: MigrationConfig,
        registry: MigrationRegistry,
    ) -> MigrationResult<Self> {
        let pool = backends::connect(database_url, &DatabasePoolConfig::default()).await?;
        Self::with_registry(config, pool, registry)
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Local migrations, oldest first
    pub fn discover(&self) -> MigrationResult<Vec<MigrationRecord>> {
        self.discovery.discover(&self.config.migrations_dir)
    }

    /// Close the underlying connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Discover local files and read the ledger in a single transaction
    pub(crate) async fn plan(&self) -> MigrationResult<MigrationPlan> {
        tracing::info!(dir = %self.config.migrations_dir.display(), "Seeing migrations");
        let local = self.discover()?;

        let mut tx = self.pool.begin_transaction().await?;
        let read = async {
            self.ledger.ensure_schema(tx.executor()).await?;
            let latest = self.ledger.latest(tx.executor()).await?;
            let applied = self.ledger.all(tx.executor()).await?;
            Ok::<_, MigrationError>((latest, applied))
        }
        .await;

        let (latest, applied) = match read {
            Ok(state) => state,
            Err(e) => {
                rollback(tx, "ledger read").await;
                return Err(e);
            }
        };
        tx.commit().await?;

        Ok(MigrationPlan::new(local, latest, applied))
    }

    /// Apply every pending migration, oldest first
    ///
    /// Each migration runs in its own transaction together with its ledger
    /// row. The first failure is returned and nothing after it is attempted.
    pub async fn update(&self) -> MigrationResult<UpdateReport> {
        let started = Instant::now();
        let plan = self.plan().await?;

        if !plan.out_of_order.is_empty() {
            self.check_out_of_order(&plan)?;
        }

        let count = plan.pending.len();
        tracing::info!(
            count,
            "Found {} new {}",
            count,
            if count == 1 { "migration" } else { "migrations" }
        );
        for (index, record) in plan.pending.iter().enumerate() {
            tracing::info!("[{}] {} created on {}", index + 1, record.name, record.timestamp);
        }

        let modules = self.loader.load_all(&plan.pending)?;

        let mut applied = Vec::with_capacity(modules.len());
        for (index, (record, migration)) in modules.into_iter().enumerate() {
            let span = tracing::info_span!("migration", index = index + 1, name = %record.name);
            let recorded = self
                .apply_one(&record, migration.as_ref())
                .instrument(span)
                .await?;
            applied.push(recorded);
        }

        Ok(UpdateReport {
            pending: plan.pending,
            applied,
            skipped: plan.out_of_order,
            elapsed: started.elapsed(),
        })
    }

    fn check_out_of_order(&self, plan: &MigrationPlan) -> MigrationResult<()> {
        let latest = plan
            .latest
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        if !self.config.allow_out_of_order {
            return Err(MigrationError::OutOfOrder {
                latest,
                names: plan.out_of_order.iter().map(ToString::to_string).collect(),
            });
        }

        for record in &plan.out_of_order {
            tracing::warn!(
                migration = %record,
                latest = %latest,
                "Skipping migration older than the latest applied one"
            );
        }
        Ok(())
    }

    async fn apply_one(
        &self,
        record: &MigrationRecord,
        migration: &dyn Migration,
    ) -> MigrationResult<MigrationRecord> {
        tracing::info!("Applying migration");

        let mut tx = self.pool.begin_transaction().await?;
        let result = async {
            migration.up(tx.executor()).await?;
            self.ledger.record(tx.executor(), record).await
        }
        .await;

        match result {
            Ok(recorded) => {
                tx.commit().await?;
                tracing::info!("Ended migration");
                Ok(recorded)
            }
            Err(e) => {
                tracing::error!(error = %e, "Migration failed. We will not continue.");
                rollback(tx, &record.name).await;
                Err(e)
            }
        }
    }

    /// Check that every ledger record still has a local file
    ///
    /// Drift is reported, never raised.
    pub async fn validate(&self) -> MigrationResult<ValidationReport> {
        let plan = self.plan().await?;

        let entries: Vec<ValidationEntry> = plan
            .applied
            .iter()
            .map(|record| ValidationEntry {
                record: record.clone(),
                local_path: record.find_local(&plan.local).and_then(|l| l.path.clone()),
            })
            .collect();

        for (index, entry) in entries.iter().enumerate() {
            match &entry.local_path {
                Some(path) => tracing::info!(
                    "[{}] {} created on {} ({})",
                    index + 1,
                    entry.record.name,
                    entry.record.timestamp,
                    path.display()
                ),
                None => tracing::warn!(
                    "[{}] {} created on {} couldn't be found in local files",
                    index + 1,
                    entry.record.name,
                    entry.record.timestamp
                ),
            }
        }
        for record in &plan.out_of_order {
            tracing::warn!(
                migration = %record,
                "Local migration is older than the latest applied one"
            );
        }

        let report = ValidationReport {
            entries,
            out_of_order: plan.out_of_order,
        };
        if report.is_consistent() {
            tracing::info!("All migrations from the database can be found in local files.");
        }
        Ok(report)
    }

    /// State of every local and applied migration, oldest first
    pub async fn status(&self) -> MigrationResult<Vec<(MigrationRecord, MigrationStatus)>> {
        let plan = self.plan().await?;

        let mut statuses: Vec<(MigrationRecord, MigrationStatus)> = plan
            .local
            .iter()
            .map(|record| match record.find_local(&plan.applied) {
                Some(applied) => (
                    MigrationRecord {
                        id: applied.id,
                        ..record.clone()
                    },
                    MigrationStatus::Applied,
                ),
                None if plan.pending.iter().any(|p| p.same_migration(record)) => {
                    (record.clone(), MigrationStatus::Pending)
                }
                None => (record.clone(), MigrationStatus::Skipped),
            })
            .collect();

        statuses.extend(
            plan.applied
                .iter()
                .filter(|record| record.find_local(&plan.local).is_none())
                .map(|record| (record.clone(), MigrationStatus::Missing)),
        );

        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(statuses)
    }
}

/// Roll back `tx`, logging rather than returning a rollback failure
pub(crate) async fn rollback(tx: Box<dyn DatabaseTransaction>, what: &str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback of {} failed", what);
    }
}

//! Migration Rollback - Reverting the most recently applied migration
//!
//! A downgrade is always exactly one step: the latest ledger record is
//! reverted with its own `down` and its ledger row is removed, both in one
//! transaction.

use std::time::Instant;

use tracing::Instrument;

use super::definitions::DowngradeReport;
use super::runner::{rollback, Migrator};
use crate::error::{MigrationError, MigrationResult};

/// Extension trait for Migrator to add rollback functionality
#[allow(async_fn_in_trait)]
pub trait MigrationRollback {
    /// Revert the latest applied migration
    async fn downgrade(&self) -> MigrationResult<DowngradeReport>;
}

impl MigrationRollback for Migrator {
    async fn downgrade(&self) -> MigrationResult<DowngradeReport> {
        let started = Instant::now();
        let plan = self.plan().await?;

        let latest = plan.latest.ok_or(MigrationError::NothingToDowngrade)?;
        let latest = latest.resolve_local(&plan.local)?;

        let target = latest
            .first_older(&plan.local)
            .cloned()
            .unwrap_or_else(|| latest.clone());

        if target.same_migration(&latest) {
            tracing::info!(
                "Will downgrade the {} (created on {}) as it's the last migration",
                latest.name,
                latest.timestamp
            );
        } else {
            tracing::info!(
                "Will downgrade to {} created on {} from {} (created on {})",
                target.name,
                target.timestamp,
                latest.name,
                latest.timestamp
            );
        }

        let migration = self.loader().load(&latest)?;

        let span = tracing::info_span!("migration", name = %latest.name);
        async {
            let mut tx = self.pool().begin_transaction().await?;
            let result = async {
                migration.down(tx.executor()).await?;
                self.ledger().erase(tx.executor(), &latest).await
            }
            .await;

            match result {
                Ok(()) => {
                    tx.commit().await?;
                    tracing::info!("Ended downgrade");
                    Ok::<(), MigrationError>(())
                }
                Err(e) => {
                    tracing::error!(error = %e, "Downgrade failed");
                    rollback(tx, &latest.name).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await?;

        Ok(DowngradeReport {
            reverted: latest,
            target,
            elapsed: started.elapsed(),
        })
    }
}

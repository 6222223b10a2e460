use std::path::Path;

use anyhow::{bail, Context};
use lambo_migrate::{
    create_migration, mask_database_url, AppConfig, MigrationRecord, MigrationRegistry,
    MigrationRollback, MigrationStatus, Migrator,
};
use serde::Serialize;

async fn migrator(config: &AppConfig, registry: MigrationRegistry) -> anyhow::Result<Migrator> {
    let url = config.require_database_url()?;
    let masked = mask_database_url(url);
    tracing::info!(url = %masked, "Connecting to database");

    Migrator::connect(url, config.migration.clone(), registry)
        .await
        .with_context(|| format!("Failed to set up migrations against {}", masked))
}

pub async fn update(config: &AppConfig, registry: MigrationRegistry) -> anyhow::Result<()> {
    let migrator = migrator(config, registry).await?;
    let result = migrator.update().await;
    migrator.close().await;
    let report = result?;

    if report.is_noop() {
        println!("Nothing to migrate, the database is up to date");
    } else {
        println!(
            "Applied {} migration(s) in {:.2?}:",
            report.applied.len(),
            report.elapsed
        );
        for record in &report.applied {
            println!("  ✅ {}", record);
        }
    }
    for record in &report.skipped {
        println!("  ⚠️  {} skipped (older than the latest applied migration)", record);
    }
    Ok(())
}

pub async fn downgrade(config: &AppConfig, registry: MigrationRegistry) -> anyhow::Result<()> {
    let migrator = migrator(config, registry).await?;
    let result = migrator.downgrade().await;
    migrator.close().await;
    let report = result?;

    println!("Reverted {} in {:.2?}", report.reverted, report.elapsed);
    if report.reverted_to_empty() {
        println!("No older local migration remains");
    } else {
        println!("Database is now at {}", report.target);
    }
    Ok(())
}

pub async fn validate(config: &AppConfig, registry: MigrationRegistry) -> anyhow::Result<()> {
    let migrator = migrator(config, registry).await?;
    let result = migrator.validate().await;
    migrator.close().await;
    let report = result?;

    for (index, entry) in report.entries.iter().enumerate() {
        let marker = if entry.is_matched() { "✅" } else { "❌" };
        println!(
            "  [{}] {} {} created on {}",
            index + 1,
            marker,
            entry.record.name,
            entry.record.timestamp
        );
    }
    for record in &report.out_of_order {
        println!("  ⚠️  {} was never applied and is older than the latest migration", record);
    }

    let unmatched = report.unmatched();
    if !unmatched.is_empty() {
        let names: Vec<String> = unmatched.iter().map(ToString::to_string).collect();
        bail!(
            "{} applied migration(s) couldn't be found in local files: {}",
            unmatched.len(),
            names.join(", ")
        );
    }

    println!("All migrations from the database can be found in local files.");
    Ok(())
}

#[derive(Serialize)]
struct StatusLine<'a> {
    migration: String,
    name: &'a str,
    timestamp: i64,
    file: Option<&'a Path>,
    status: &'a MigrationStatus,
}

/// One JSON object per migration
fn json_lines(statuses: &[(MigrationRecord, MigrationStatus)]) -> anyhow::Result<Vec<String>> {
    statuses
        .iter()
        .map(|(record, status)| {
            let line = StatusLine {
                migration: record.to_string(),
                name: &record.name,
                timestamp: record.unix_timestamp(),
                file: record.path.as_deref(),
                status,
            };
            Ok(serde_json::to_string(&line)?)
        })
        .collect()
}

pub async fn status(
    config: &AppConfig,
    registry: MigrationRegistry,
    json: bool,
) -> anyhow::Result<()> {
    let migrator = migrator(config, registry).await?;
    let result = migrator.status().await;
    migrator.close().await;
    let statuses = result?;

    if json {
        for line in json_lines(&statuses)? {
            println!("{}", line);
        }
        return Ok(());
    }

    println!("Migration Status:");
    println!("================");
    if statuses.is_empty() {
        println!("No migrations found");
    }
    for (record, status) in &statuses {
        let icon = match status {
            MigrationStatus::Applied => "✅",
            MigrationStatus::Pending => "⏳",
            MigrationStatus::Skipped => "⚠️ ",
            MigrationStatus::Missing => "❌",
        };
        println!("  {} {} ({})", icon, record, status);
    }
    Ok(())
}

pub fn create(config: &AppConfig, name: &str) -> anyhow::Result<()> {
    println!(
        "Commencing to create a migration file in: `{}`.",
        config.migration.migrations_dir.display()
    );
    let path = create_migration(&config.migration, name)?;
    println!("File `{}` has been created!", path.display());
    Ok(())
}

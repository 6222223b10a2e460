use lambo_migrate::MigrationRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lambo_migrate_cli::run_with_registry(MigrationRegistry::new()).await
}

//! Migration System
//!
//! Discovery of migration files, the ledger of applied migrations, loading
//! of migration units, and the runner that ties them together.

pub mod definitions;
pub mod discovery;
pub mod ledger;
pub mod module;
pub mod rollback;
pub mod runner;
pub mod scaffold;

pub use definitions::*;
pub use discovery::Discovery;
pub use ledger::Ledger;
pub use module::{split_sql_statements, Migration, MigrationRegistry, ModuleLoader, SqlScript};
pub use rollback::MigrationRollback;
pub use runner::Migrator;
pub use scaffold::{create_migration, create_migration_at};

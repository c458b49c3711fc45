pub mod ledger;
pub mod migrations;
pub mod runner;
pub mod schema;
pub mod store;

pub use ledger::{Ledger, LedgerEntry, SqliteLedger};
pub use migrations::{
    AppliedMigration, Migration, MigrationFailure, MigrationFn, MigrationRunResult, RollbackResult,
};
pub use runner::MigrationRunner;
pub use store::Database;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use flowstate_common::{Error, Result};
use rusqlite::Connection;
use tracing::info;

use crate::ledger::{Ledger, LedgerEntry, SqliteLedger};
use crate::migrations::{Migration, MigrationRunResult, RollbackResult};
use crate::runner::MigrationRunner;

/// Handle to the FlowState embedded database.
///
/// Owns the connection behind a mutex; every migration operation locks it
/// for the duration of one runner call, so at most one invocation is in
/// flight per store handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    /// Ensure the migration ledger exists and apply every pending registry
    /// migration, in version order.
    ///
    /// Safe to call on every app start: with nothing pending it is a
    /// successful no-op. Migration failures come back inside the result
    /// with `success == false`; an `Err` means the ledger itself was
    /// unavailable and nothing can be said about schema state.
    pub fn initialize(&self, registry: &[Migration]) -> Result<MigrationRunResult> {
        let conn = self.connection()?;
        let result = MigrationRunner::new(&conn, SqliteLedger::new(&conn)).apply_all(registry)?;
        info!(
            "schema at version {} ({} applied this run)",
            result.current_version,
            result.applied.len()
        );
        Ok(result)
    }

    /// Roll back the single most recently applied migration.
    pub fn rollback_one(&self, registry: &[Migration]) -> Result<RollbackResult> {
        let conn = self.connection()?;
        MigrationRunner::new(&conn, SqliteLedger::new(&conn)).rollback_one(registry)
    }

    /// Highest applied schema version, 0 for a fresh store.
    pub fn current_version(&self) -> Result<u32> {
        let conn = self.connection()?;
        let mut ledger = SqliteLedger::new(&conn);
        ledger.ensure()?;
        ledger.current_version()
    }

    /// All ledger rows, ascending by version.
    pub fn applied_list(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.connection()?;
        let mut ledger = SqliteLedger::new(&conn);
        ledger.ensure()?;
        ledger.applied_entries()
    }

    /// Registry migrations not yet applied, ascending by version.
    pub fn pending_list(&self, registry: &[Migration]) -> Result<Vec<Migration>> {
        let conn = self.connection()?;
        MigrationRunner::new(&conn, SqliteLedger::new(&conn)).pending(registry)
    }

    pub fn is_applied(&self, version: u32) -> Result<bool> {
        let conn = self.connection()?;
        MigrationRunner::new(&conn, SqliteLedger::new(&conn)).is_applied(version)
    }

    /// Drop the migration ledger entirely. Test and teardown paths only;
    /// application tables created by migrations are left in place.
    pub fn reset_ledger(&self) -> Result<()> {
        let conn = self.connection()?;
        SqliteLedger::new(&conn).drop_all()
    }

    /// Whether a table exists in the SQLite catalog. Diagnostic helper for
    /// verifying what migrations actually created.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
            [name],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to check table {name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationFn;

    fn create_notes(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);")
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn drop_notes(conn: &Connection) -> Result<()> {
        conn.execute_batch("DROP TABLE notes;")
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn registry() -> Vec<Migration> {
        vec![Migration {
            version: 1,
            name: "create_notes_table",
            up: create_notes,
            down: Some(drop_notes as MigrationFn),
        }]
    }

    #[test]
    fn fresh_store_reports_version_zero() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.current_version().unwrap(), 0);
        assert!(db.applied_list().unwrap().is_empty());
        assert!(!db.is_applied(1).unwrap());
    }

    #[test]
    fn initialize_applies_and_diagnostics_agree() {
        let db = Database::in_memory().unwrap();
        let registry = registry();

        let result = db.initialize(&registry).unwrap();
        assert!(result.success);
        assert_eq!(result.current_version, 1);

        assert!(db.table_exists("notes").unwrap());
        assert!(db.is_applied(1).unwrap());
        assert!(db.pending_list(&registry).unwrap().is_empty());

        let applied = db.applied_list().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "create_notes_table");
    }

    #[test]
    fn rollback_one_drops_the_table() {
        let db = Database::in_memory().unwrap();
        let registry = registry();
        db.initialize(&registry).unwrap();

        let r = db.rollback_one(&registry).unwrap();
        assert!(r.success);
        assert_eq!(r.current_version, 0);
        assert!(!db.table_exists("notes").unwrap());
    }

    #[test]
    fn reset_ledger_forgets_history_but_keeps_tables() {
        let db = Database::in_memory().unwrap();
        let registry = registry();
        db.initialize(&registry).unwrap();

        db.reset_ledger().unwrap();
        assert_eq!(db.current_version().unwrap(), 0);
        // The application table survives the ledger reset
        assert!(db.table_exists("notes").unwrap());
    }

    #[test]
    fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowstate.db");
        let registry = registry();

        {
            let db = Database::open(&path).unwrap();
            let result = db.initialize(&registry).unwrap();
            assert_eq!(result.applied.len(), 1);
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.current_version().unwrap(), 1);
        let result = db.initialize(&registry).unwrap();
        assert!(result.success);
        assert!(result.applied.is_empty());
    }
}

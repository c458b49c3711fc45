use chrono::{DateTime, Utc};
use flowstate_common::{Error, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

/// Name of the tracking table. The underscore prefix keeps it out of the
/// way of application tables created by migrations.
pub const LEDGER_TABLE: &str = "_migrations";

/// One row of the migration ledger: a migration that has been applied and
/// not yet rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: u32,
    pub name: String,
    /// Seconds since the Unix epoch, set at apply time.
    pub applied_at: i64,
}

impl LedgerEntry {
    pub fn applied_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.applied_at, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Narrow repository interface over the persisted migration ledger.
///
/// The runner only talks to the ledger through this trait, so tests can
/// substitute an in-memory fake without touching runner logic.
pub trait Ledger {
    /// Create the tracking table if absent. Idempotent, called on every
    /// runner invocation.
    fn ensure(&mut self) -> Result<()>;

    /// Highest applied version, 0 if the ledger is empty. The single source
    /// of truth for how far this store has been migrated.
    fn current_version(&self) -> Result<u32>;

    /// All applied versions, ascending.
    fn applied_versions(&self) -> Result<Vec<u32>>;

    /// All ledger rows, ascending by version.
    fn applied_entries(&self) -> Result<Vec<LedgerEntry>>;

    fn is_applied(&self, version: u32) -> Result<bool> {
        Ok(self.applied_versions()?.contains(&version))
    }

    /// Insert one row. Only called after the migration's `up` completed
    /// without error.
    fn record_applied(&mut self, version: u32, name: &str, applied_at: i64) -> Result<()>;

    /// Delete the row for `version`. Only called after the migration's
    /// `down` completed without error.
    fn record_rolled_back(&mut self, version: u32) -> Result<()>;

    /// Drop the tracking table entirely. Test/teardown paths only, never
    /// part of the production contract.
    fn drop_all(&mut self) -> Result<()>;
}

/// Ledger stored in the same SQLite database the migrations run against.
pub struct SqliteLedger<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteLedger<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl Ledger for SqliteLedger<'_> {
    fn ensure(&mut self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at INTEGER NOT NULL
                );"
            ))
            .map_err(|e| Error::Database(format!("failed to create migration ledger: {e}")))
    }

    fn current_version(&self) -> Result<u32> {
        let version: i64 = self
            .conn
            .query_row(
                &format!("SELECT COALESCE(MAX(version), 0) FROM {LEDGER_TABLE}"),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to read current version: {e}")))?;
        Ok(version as u32)
    }

    fn applied_versions(&self) -> Result<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT version FROM {LEDGER_TABLE} ORDER BY version ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Database(format!("failed to query applied versions: {e}")))?;

        let mut versions = Vec::new();
        for row in rows {
            let v =
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?;
            versions.push(v as u32);
        }
        Ok(versions)
    }

    fn applied_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT version, name, applied_at FROM {LEDGER_TABLE} ORDER BY version ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get::<_, i64>(0)? as u32,
                    name: row.get(1)?,
                    applied_at: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries
                .push(row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?);
        }
        Ok(entries)
    }

    fn is_applied(&self, version: u32) -> Result<bool> {
        self.conn
            .query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM {LEDGER_TABLE} WHERE version = ?1)"),
                params![version],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check applied version: {e}")))
    }

    fn record_applied(&mut self, version: u32, name: &str, applied_at: i64) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {LEDGER_TABLE} (version, name, applied_at) VALUES (?1, ?2, ?3)"
                ),
                params![version, name, applied_at],
            )
            .map_err(|e| {
                Error::Database(format!("failed to record migration {version}: {e}"))
            })?;
        Ok(())
    }

    fn record_rolled_back(&mut self, version: u32) -> Result<()> {
        self.conn
            .execute(
                &format!("DELETE FROM {LEDGER_TABLE} WHERE version = ?1"),
                params![version],
            )
            .map_err(|e| {
                Error::Database(format!("failed to remove ledger row for {version}: {e}"))
            })?;
        Ok(())
    }

    fn drop_all(&mut self) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {LEDGER_TABLE};"))
            .map_err(|e| Error::Database(format!("failed to drop migration ledger: {e}")))
    }
}

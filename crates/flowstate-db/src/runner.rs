use std::collections::HashSet;

use chrono::Utc;
use flowstate_common::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::migrations::{
    AppliedMigration, Migration, MigrationFailure, MigrationRunResult, RollbackResult,
    validate_registry,
};

/// Executes migrations against a database connection, tracking progress in
/// the injected ledger.
///
/// One runner borrows the connection exclusively for the duration of its
/// calls; every operation is synchronous and runs to completion. Concurrent
/// invocation against the same store is unsupported.
pub struct MigrationRunner<'r, L: Ledger> {
    conn: &'r Connection,
    ledger: L,
}

impl<'r, L: Ledger> MigrationRunner<'r, L> {
    pub fn new(conn: &'r Connection, ledger: L) -> Self {
        Self { conn, ledger }
    }

    /// Apply every registry migration not yet in the ledger, in ascending
    /// version order, stopping at the first failure.
    ///
    /// An empty pending list is a successful no-op, so this is safe to call
    /// on every app start. A failed migration is never recorded; re-running
    /// resumes from the same freshly recomputed pending list.
    pub fn apply_all(&mut self, registry: &[Migration]) -> Result<MigrationRunResult> {
        validate_registry(registry)?;
        self.ledger.ensure()?;

        let applied: HashSet<u32> = self.ledger.applied_versions()?.into_iter().collect();
        let mut pending: Vec<&Migration> = registry
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();
        // Version order is the correctness guarantee, even for an unordered
        // registry.
        pending.sort_by_key(|m| m.version);

        let mut done: Vec<AppliedMigration> = Vec::new();
        for migration in pending {
            info!("applying migration {} ({})", migration.version, migration.name);

            if let Err(e) = (migration.up)(self.conn) {
                warn!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.name
                );
                return Ok(MigrationRunResult {
                    success: false,
                    applied: done,
                    current_version: self.ledger.current_version()?,
                    error: Some(MigrationFailure::Apply {
                        version: migration.version,
                        name: migration.name.to_string(),
                        message: e.to_string(),
                    }),
                });
            }

            self.ledger
                .record_applied(migration.version, migration.name, Utc::now().timestamp())?;
            done.push(AppliedMigration::from(migration));
        }

        Ok(MigrationRunResult {
            success: true,
            applied: done,
            current_version: self.ledger.current_version()?,
            error: None,
        })
    }

    /// Roll back the single most recently applied migration (by version).
    ///
    /// Rolling back an empty history is a successful no-op. The ledger row
    /// is only deleted after the `down` procedure completes, so a failed
    /// rollback leaves the recorded state matching the actual state.
    pub fn rollback_one(&mut self, registry: &[Migration]) -> Result<RollbackResult> {
        validate_registry(registry)?;
        self.ledger.ensure()?;

        let version = self.ledger.current_version()?;
        if version == 0 {
            return Ok(RollbackResult {
                success: true,
                rolled_back: None,
                current_version: 0,
                error: None,
            });
        }

        let Some(migration) = registry.iter().find(|m| m.version == version) else {
            // Ledger references a version the code no longer knows about:
            // schema drift between deployed history and the registry.
            return Ok(RollbackResult {
                success: false,
                rolled_back: None,
                current_version: version,
                error: Some(MigrationFailure::RollbackTargetMissing { version }),
            });
        };

        let Some(down) = migration.down else {
            return Ok(RollbackResult {
                success: false,
                rolled_back: None,
                current_version: version,
                error: Some(MigrationFailure::RollbackUnsupported {
                    version,
                    name: migration.name.to_string(),
                }),
            });
        };

        info!("rolling back migration {} ({})", version, migration.name);

        if let Err(e) = down(self.conn) {
            warn!("rollback of migration {version} ({}) failed: {e}", migration.name);
            return Ok(RollbackResult {
                success: false,
                rolled_back: None,
                current_version: version,
                error: Some(MigrationFailure::RollbackExec {
                    version,
                    name: migration.name.to_string(),
                    message: e.to_string(),
                }),
            });
        }

        self.ledger.record_rolled_back(version)?;

        Ok(RollbackResult {
            success: true,
            rolled_back: Some(AppliedMigration::from(migration)),
            current_version: self.ledger.current_version()?,
            error: None,
        })
    }

    /// Registry migrations not yet applied, ascending. No side effects
    /// beyond ensuring the ledger table exists.
    pub fn pending(&mut self, registry: &[Migration]) -> Result<Vec<Migration>> {
        validate_registry(registry)?;
        self.ledger.ensure()?;

        let applied: HashSet<u32> = self.ledger.applied_versions()?.into_iter().collect();
        let mut pending: Vec<Migration> = registry
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .copied()
            .collect();
        pending.sort_by_key(|m| m.version);
        Ok(pending)
    }

    pub fn is_applied(&mut self, version: u32) -> Result<bool> {
        self.ledger.ensure()?;
        self.ledger.is_applied(version)
    }

    pub fn current_version(&mut self) -> Result<u32> {
        self.ledger.ensure()?;
        self.ledger.current_version()
    }
}

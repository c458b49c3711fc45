use flowstate_common::{Error, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// A forward or inverse schema-change procedure, run against the live
/// connection. May fail; the runner converts the failure into a structured
/// result rather than letting it escape.
pub type MigrationFn = fn(&Connection) -> Result<()>;

/// A single versioned schema migration.
///
/// The version number defines application order (ascending) and must be
/// positive and unique across the registry. `down` is hand-authored; a
/// migration without one cannot be rolled back.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: MigrationFn,
    pub down: Option<MigrationFn>,
}

/// Version/name summary of a migration that was applied or rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

impl From<&Migration> for AppliedMigration {
    fn from(m: &Migration) -> Self {
        Self {
            version: m.version,
            name: m.name.to_string(),
        }
    }
}

/// A migration outcome that did not succeed. Carried inside run/rollback
/// results so callers check `success` instead of catching errors; only
/// ledger-availability failures surface as `Err` from the public API.
#[derive(Debug, Clone, PartialEq, Eq, ThisError, Serialize, Deserialize)]
pub enum MigrationFailure {
    #[error("migration {version} ({name}) failed: {message}")]
    Apply {
        version: u32,
        name: String,
        message: String,
    },

    #[error("migration {version} ({name}) does not support rollback")]
    RollbackUnsupported { version: u32, name: String },

    #[error("applied version {version} is missing from the registry")]
    RollbackTargetMissing { version: u32 },

    #[error("rollback of migration {version} ({name}) failed: {message}")]
    RollbackExec {
        version: u32,
        name: String,
        message: String,
    },
}

/// Outcome of one apply-to-latest run.
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationRunResult {
    /// True iff every attempted migration this run applied cleanly
    /// (an empty pending list is a successful no-op).
    pub success: bool,
    /// Migrations applied during this call, in the order they ran.
    pub applied: Vec<AppliedMigration>,
    /// Highest version in the ledger after the run, 0 if empty.
    pub current_version: u32,
    pub error: Option<MigrationFailure>,
}

/// Outcome of one single-step rollback.
#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    /// The migration that was rolled back, `None` on an empty-history no-op.
    pub rolled_back: Option<AppliedMigration>,
    pub current_version: u32,
    pub error: Option<MigrationFailure>,
}

/// Reject registries that violate the version invariant (positive, unique)
/// before any ledger mutation. A bad registry is a caller bug, not a run
/// outcome.
pub(crate) fn validate_registry(registry: &[Migration]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for migration in registry {
        if migration.version == 0 {
            return Err(Error::Migration(format!(
                "migration {:?} has version 0, versions must be positive",
                migration.name
            )));
        }
        if !seen.insert(migration.version) {
            return Err(Error::Migration(format!(
                "duplicate migration version {}",
                migration.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_conn: &Connection) -> Result<()> {
        Ok(())
    }

    fn m(version: u32) -> Migration {
        Migration {
            version,
            name: "noop",
            up: noop,
            down: None,
        }
    }

    #[test]
    fn valid_registry_passes() {
        assert!(validate_registry(&[m(1), m(2), m(3)]).is_ok());
        assert!(validate_registry(&[]).is_ok());
        // Unordered is fine, ordering is the runner's job
        assert!(validate_registry(&[m(3), m(1), m(2)]).is_ok());
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let err = validate_registry(&[m(1), m(2), m(2)]).unwrap_err();
        assert!(err.to_string().contains("duplicate migration version 2"));
    }

    #[test]
    fn version_zero_is_rejected() {
        let err = validate_registry(&[m(0)]).unwrap_err();
        assert!(err.to_string().contains("version 0"));
    }

    #[test]
    fn run_result_serializes_for_diagnostics() {
        let result = MigrationRunResult {
            success: false,
            applied: vec![AppliedMigration {
                version: 1,
                name: "create_baselines_table".into(),
            }],
            current_version: 1,
            error: Some(MigrationFailure::Apply {
                version: 2,
                name: "create_sessions_table".into(),
                message: "disk I/O error".into(),
            }),
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("create_sessions_table"));

        let back: MigrationRunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_version, 1);
        assert_eq!(back.applied, result.applied);
    }

    #[test]
    fn failure_display_preserves_underlying_message() {
        let f = MigrationFailure::Apply {
            version: 3,
            name: "create_circadian_patterns_table".into(),
            message: "no such table: sessions".into(),
        };
        assert_eq!(
            f.to_string(),
            "migration 3 (create_circadian_patterns_table) failed: no such table: sessions"
        );

        let f = MigrationFailure::RollbackUnsupported {
            version: 2,
            name: "create_sessions_table".into(),
        };
        assert!(f.to_string().contains("does not support rollback"));
    }
}

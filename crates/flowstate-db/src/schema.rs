//! The FlowState app's migration registry.
//!
//! Every schema change ships here as a new entry with the next version
//! number. Entries are append-only; editing an already-released migration
//! desynchronises deployed ledgers from the code.

use flowstate_common::{Error, Result};
use rusqlite::Connection;

use crate::migrations::Migration;

/// All known migrations, in release order.
pub fn registry() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_baselines_table",
            up: create_baselines_table,
            down: Some(drop_baselines_table),
        },
        Migration {
            version: 2,
            name: "create_sessions_table",
            up: create_sessions_table,
            down: Some(drop_sessions_table),
        },
        Migration {
            version: 3,
            name: "create_circadian_patterns_table",
            up: create_circadian_patterns_table,
            down: Some(drop_circadian_patterns_table),
        },
    ]
}

fn exec(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute_batch(sql)
        .map_err(|e| Error::Database(format!("schema change failed: {e}")))
}

/// Per-user EEG baseline statistics, recalibrated periodically.
fn create_baselines_table(conn: &Connection) -> Result<()> {
    exec(
        conn,
        "CREATE TABLE baselines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at INTEGER NOT NULL,
            theta_mean REAL NOT NULL,
            theta_std REAL NOT NULL,
            alpha_mean REAL NOT NULL,
            alpha_std REAL NOT NULL,
            sample_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_baselines_recorded ON baselines(recorded_at);",
    )
}

fn drop_baselines_table(conn: &Connection) -> Result<()> {
    exec(conn, "DROP TABLE baselines;")
}

/// Completed focus/relaxation sessions with their summary metrics.
fn create_sessions_table(conn: &Connection) -> Result<()> {
    exec(
        conn,
        "CREATE TABLE sessions (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            protocol TEXT NOT NULL,
            avg_theta_power REAL,
            avg_z_score REAL,
            dominant_state TEXT
        );
        CREATE INDEX idx_sessions_started ON sessions(started_at);",
    )
}

fn drop_sessions_table(conn: &Connection) -> Result<()> {
    exec(conn, "DROP TABLE sessions;")
}

/// Hour-of-day alertness aggregates used for scheduling suggestions.
fn create_circadian_patterns_table(conn: &Connection) -> Result<()> {
    exec(
        conn,
        "CREATE TABLE circadian_patterns (
            hour INTEGER PRIMARY KEY CHECK (hour BETWEEN 0 AND 23),
            avg_theta_power REAL NOT NULL DEFAULT 0,
            avg_alertness REAL NOT NULL DEFAULT 0,
            sample_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );",
    )
}

fn drop_circadian_patterns_table(conn: &Connection) -> Result<()> {
    exec(conn, "DROP TABLE circadian_patterns;")
}

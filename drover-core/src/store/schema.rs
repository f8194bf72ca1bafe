//! Queue store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! A database reporting a version this build does not know about is
//! re-provisioned from scratch.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: queued data points, append-and-mark ledger
    r#"
    CREATE TABLE IF NOT EXISTS data_points (
        record_id    INTEGER PRIMARY KEY AUTOINCREMENT,
        generator_id TEXT NOT NULL,
        data_point   JSON NOT NULL,

        -- Event time, epoch millis (defaults to enqueue time)
        date         INTEGER NOT NULL,

        -- Epoch millis of successful upload; 0 = not yet transmitted
        transmitted  INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_data_points_transmitted ON data_points(transmitted);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let mut current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking queue store migrations"
    );

    if current_version > SCHEMA_VERSION {
        // Unknown future schema: provision fresh rather than guess
        tracing::warn!(
            current_version,
            "Unknown schema version, re-provisioning queue store"
        );
        conn.execute_batch(
            r#"
            DROP INDEX IF EXISTS idx_data_points_transmitted;
            DROP TABLE IF EXISTS data_points;
            PRAGMA user_version = 0;
            "#,
        )?;
        current_version = 0;
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_results_table",
        sql: include_str!("sql/002_create_results.sql"),
    },
    Migration {
        version: 3,
        description: "create_usage_log_table",
        sql: include_str!("sql/003_create_usage_log.sql"),
    },
    Migration {
        version: 4,
        description: "create_queue_messages_table",
        sql: include_str!("sql/004_create_queue_messages.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        // A migration and its bookkeeping row commit together. The SQL is
        // written with IF NOT EXISTS so a concurrent runner may re-apply it.
        let batch = format!(
            "BEGIN IMMEDIATE;\n{}\nINSERT OR IGNORE INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );
        if let Err(e) = conn.execute_batch(&batch) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

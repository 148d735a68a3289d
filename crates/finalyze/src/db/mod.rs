//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access within one process is serialized through a `Mutex<Connection>`;
//! separate processes (front end and workers) coordinate through SQLite's own
//! file locking, which is why every state change is a single conditional
//! statement or an `IMMEDIATE` transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod queue_repo;
pub mod result_repo;
pub mod retry;
pub mod stats_repo;
pub mod usage_repo;

pub use error::DatabaseError;

/// How long a connection waits on a competing writer before reporting
/// `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled so polling readers
/// do not block the worker's writes.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_busy_timeout(path, BUSY_TIMEOUT)
    }

    /// Like [`Database::open`], waiting at most `busy_timeout` on a competing
    /// writer before a statement fails with `SQLITE_BUSY`.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an `IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so a competing process cannot slip a
    /// write between our read and our update. The transaction commits when `f`
    /// returns `Ok` and rolls back otherwise.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Formats a timestamp for storage.
///
/// Fixed microsecond precision keeps stored values lexicographically
/// comparable, which the lease and visibility queries rely on.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Integrity(format!("invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("finalyze.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_competing_writer_reports_transient_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finalyze.db");
        let db = Database::open_with_busy_timeout(&path, Duration::from_millis(20)).unwrap();

        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let err = db.transaction(|_| Ok(())).unwrap_err();
        assert!(err.is_transient(), "{:?}", err);

        locker.execute_batch("COMMIT").unwrap();
        db.transaction(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO usage_log (job_id, file_size, query_length, timestamp)
                 VALUES ('j1', 10, 5, '2026-01-01T00:00:00.000000Z')",
                [],
            )?;
            Err(DatabaseError::Integrity("abort".to_string()))
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM usage_log", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO usage_log (job_id, file_size, query_length, timestamp)
                 VALUES ('j1', 10, 5, '2026-01-01T00:00:00.000000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM usage_log", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_timestamp_round_trip_is_fixed_width() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1500);
        let (sa, sb) = (format_timestamp(a), format_timestamp(b));
        assert_eq!(sa.len(), sb.len());
        assert!(sa < sb);
        assert_eq!(
            parse_timestamp(&sa).unwrap().timestamp_micros(),
            a.timestamp_micros()
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(DatabaseError::Integrity(_))
        ));
    }
}

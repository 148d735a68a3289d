//! Test harness for isolated end-to-end runs of the job lifecycle.
//!
//! Each `TestHarness` owns a temporary directory holding a file-backed
//! database and the upload directory, and hands out the front-end and
//! worker components wired to them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use finalyze::analysis::{Analyzer, Document};
use finalyze::db::retry::RetryPolicy;
use finalyze::db::Database;
use finalyze::dispatcher::{Dispatcher, DispatcherSettings};
use finalyze::error::AnalysisError;
use finalyze::queue::Queue;
use finalyze::status::{StatusService, StatusSettings};
use finalyze::storage::ArtifactStore;
use finalyze::worker::{JobProcessor, ProcessorSettings};

pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("finalyze.db");
        let db = Database::open(&db_path).expect("Failed to open test database");
        Self::assemble(temp_dir, db_path, db)
    }

    /// A harness whose connection gives up quickly on a competing writer.
    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("finalyze.db");
        let db = Database::open_with_busy_timeout(&db_path, busy_timeout)
            .expect("Failed to open test database");
        Self::assemble(temp_dir, db_path, db)
    }

    fn assemble(temp_dir: TempDir, db_path: PathBuf, db: Database) -> Self {
        Self {
            upload_dir: temp_dir.path().join("uploads"),
            temp_dir,
            db_path,
            db,
        }
    }

    /// Opens a second connection to the harness database and takes the
    /// write lock on it. The lock is held until the returned connection
    /// commits or is dropped.
    pub fn hold_write_lock(&self) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(&self.db_path)
            .expect("Failed to open second connection");
        conn.execute_batch("BEGIN IMMEDIATE").expect("Failed to take write lock");
        conn
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.upload_dir)
    }

    /// Number of files currently in the upload directory.
    pub fn upload_count(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|d| d.count())
            .unwrap_or(0)
    }

    pub fn dispatcher(&self, queue: Arc<dyn Queue>) -> Dispatcher {
        self.dispatcher_with(queue, dispatcher_settings())
    }

    pub fn dispatcher_with(&self, queue: Arc<dyn Queue>, settings: DispatcherSettings) -> Dispatcher {
        Dispatcher::new(self.db.clone(), queue, self.artifacts(), settings)
    }

    pub fn status(&self) -> StatusService {
        StatusService::new(self.db.clone(), StatusSettings::default())
    }

    pub fn processor(&self, queue: Arc<dyn Queue>, analyzer: Arc<dyn Analyzer>) -> JobProcessor {
        self.processor_with(queue, analyzer, processor_settings())
    }

    pub fn processor_with(
        &self,
        queue: Arc<dyn Queue>,
        analyzer: Arc<dyn Analyzer>,
        settings: ProcessorSettings,
    ) -> JobProcessor {
        JobProcessor::new(self.db.clone(), queue, self.artifacts(), analyzer, settings)
    }
}

/// Dispatcher settings with fast retries.
pub fn dispatcher_settings() -> DispatcherSettings {
    DispatcherSettings {
        async_enabled: true,
        max_upload_bytes: 1024 * 1024,
        store_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        enqueue_retry: RetryPolicy::new(3, Duration::from_millis(1)),
    }
}

pub fn processor_settings() -> ProcessorSettings {
    ProcessorSettings {
        visibility_timeout: Duration::from_secs(30),
        heartbeat_interval: Duration::from_millis(50),
        analysis_time_limit: Duration::from_secs(10),
        store_retry: RetryPolicy::new(3, Duration::from_millis(1)),
    }
}

/// Analyzer stub that counts its invocations and can be slowed down.
pub struct CountingAnalyzer {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingAnalyzer {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for CountingAnalyzer {
    fn analyze(&self, document: &Document, query: &str) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let body = std::fs::read(&document.path).map_err(|e| AnalysisError::ReadDocument {
            path: document.path.clone(),
            source: e,
        })?;
        if body.starts_with(b"CORRUPT") {
            return Err(AnalysisError::Extraction("unreadable document".to_string()));
        }
        Ok(format!("{} | {} | {} bytes", query, document.filename, body.len()))
    }
}

//! Collaborators that turn an uploaded document into analysis text.

pub mod command;
pub mod extract;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AnalysisError;

pub use command::CommandAnalyzer;
pub use extract::DocumentTextExtractor;

/// An uploaded document as the analyzer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Where the upload is stored.
    pub path: PathBuf,
    /// Name the client gave the file.
    pub filename: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filename: filename.into(),
        }
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, AnalysisError>;
}

/// Shared flag telling a running analysis to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the analysis of one document for one query.
///
/// May take minutes. Implementations are called from worker threads and must
/// not touch the job store.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, document: &Document, query: &str) -> Result<String, AnalysisError>;

    /// Like [`Analyzer::analyze`], but stops early once `cancel` fires and
    /// returns [`AnalysisError::Cancelled`]. Implementations that hold
    /// external resources (child processes, connections) must release them
    /// before returning. The default ignores the token.
    fn analyze_cancellable(
        &self,
        document: &Document,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<String, AnalysisError> {
        let _ = cancel;
        self.analyze(document, query)
    }
}

impl<F> Analyzer for F
where
    F: Fn(&Document, &str) -> Result<String, AnalysisError> + Send + Sync,
{
    fn analyze(&self, document: &Document, query: &str) -> Result<String, AnalysisError> {
        self(document, query)
    }
}

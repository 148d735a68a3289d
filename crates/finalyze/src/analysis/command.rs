use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Analyzer, CancelToken, Document, TextExtractor};
use crate::error::AnalysisError;
use crate::sanitize::redact_path;

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 500;

/// How often a running child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs an external program to analyze each document.
///
/// The program receives the extracted document text on stdin and the
/// request in its environment (`FINALYZE_QUERY`, `FINALYZE_FILE_PATH`,
/// `FINALYZE_FILENAME`). Whatever it prints on stdout is the analysis.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    extractor: Arc<dyn TextExtractor>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            extractor,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }
}

impl Analyzer for CommandAnalyzer {
    fn analyze(&self, document: &Document, query: &str) -> Result<String, AnalysisError> {
        self.analyze_cancellable(document, query, &CancelToken::new())
    }

    fn analyze_cancellable(
        &self,
        document: &Document,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<String, AnalysisError> {
        let _span = tracing::info_span!(
            "analysis.command",
            program = %self.program,
            file = %redact_path(&document.path)
        )
        .entered();

        if !document.path.exists() {
            return Err(AnalysisError::MissingArtifact(document.path.clone()));
        }
        let text = self.extractor.extract_text(&document.path)?;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("FINALYZE_QUERY", query)
            .env("FINALYZE_FILE_PATH", &document.path)
            .env("FINALYZE_FILENAME", &document.filename)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AnalysisError::Analysis(format!("failed to start '{}': {}", self.program, e))
        })?;

        // Feed stdin from a separate thread so a chatty child cannot deadlock
        // on a full stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                // A child that exits without reading stdin closes the pipe.
                let _ = stdin.write_all(text.as_bytes());
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if cancel.is_cancelled() => {
                    log::info!("Stopping '{}' (pid {})", self.program, child.id());
                    reap(&mut child);
                    return Err(AnalysisError::Cancelled);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    reap(&mut child);
                    return Err(AnalysisError::Analysis(format!(
                        "failed to wait for '{}': {}",
                        self.program, e
                    )));
                }
            }
        };
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        let stderr = String::from_utf8_lossy(&stderr);
        if !status.success() {
            return Err(AnalysisError::Analysis(format!(
                "'{}' exited with {}: {}",
                self.program,
                status,
                excerpt(&stderr)
            )));
        }

        let analysis = String::from_utf8_lossy(&stdout).trim().to_string();
        if analysis.is_empty() {
            return Err(AnalysisError::Analysis(format!(
                "'{}' produced no output: {}",
                self.program,
                excerpt(&stderr)
            )));
        }

        Ok(analysis)
    }
}

/// Kills the child and waits for it so no zombie is left. The pipe threads
/// are left to finish on their own once the pipes close.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill analyzer process {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        log::warn!("Failed to reap analyzer process {}: {}", child.id(), e);
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= MAX_STDERR_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_STDERR_CHARS).collect();
        format!("{}...", cut)
    }
}

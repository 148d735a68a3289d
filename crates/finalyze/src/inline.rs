//! Synchronous analysis: run the analyzer on the caller's thread and return
//! the text directly. Nothing is persisted.

use std::sync::Arc;

use serde::Serialize;

use crate::analysis::{Analyzer, Document};
use crate::dispatcher::{validate_upload, SubmitRequest};
use crate::job::normalize_query;
use crate::sanitize::redact_path;
use crate::storage::ArtifactStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineReport {
    pub status: &'static str,
    pub query: String,
    pub analysis: String,
    pub file_processed: String,
}

pub struct InlineAnalysis {
    artifacts: ArtifactStore,
    analyzer: Arc<dyn Analyzer>,
    max_upload_bytes: u64,
}

impl InlineAnalysis {
    pub fn new(artifacts: ArtifactStore, analyzer: Arc<dyn Analyzer>, max_upload_bytes: u64) -> Self {
        Self {
            artifacts,
            analyzer,
            max_upload_bytes,
        }
    }

    /// Blocks until the analysis is done. The temporary upload is removed
    /// whatever the outcome.
    pub fn analyze(&self, request: &SubmitRequest) -> crate::Result<InlineReport> {
        let filename = validate_upload(&request.filename, &request.content, self.max_upload_bytes)?;
        let query = normalize_query(request.query.as_deref());
        let id = uuid::Uuid::new_v4().to_string();

        let _span = tracing::info_span!("inline.analyze", id = %id).entered();

        let path = self.artifacts.store(&id, &filename, &request.content)?;
        let document = Document::new(path.clone(), filename.clone());

        let outcome = self.analyzer.analyze(&document, &query);

        if let Err(e) = self.artifacts.remove(&path) {
            log::warn!("Failed to remove upload {}: {}", redact_path(&path), e);
        }

        let analysis = outcome?;
        Ok(InlineReport {
            status: "success",
            query,
            analysis,
            file_processed: filename,
        })
    }
}

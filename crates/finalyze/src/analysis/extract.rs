use std::path::Path;

use super::TextExtractor;
use crate::error::AnalysisError;

/// Returned for documents that contain no extractable text.
pub const EMPTY_DOCUMENT_TEXT: &str = "No text content found in the document.";

/// Extracts text from PDFs (via lopdf) and plain text files.
#[derive(Debug, Clone, Default)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_pdf(&self, path: &Path) -> Result<String, AnalysisError> {
        let _span = tracing::info_span!("analysis.extract_pdf").entered();

        let bytes = std::fs::read(path).map_err(|e| AnalysisError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let doc = lopdf::Document::load_mem(&bytes)
            .map_err(|e| AnalysisError::Extraction(format!("unreadable PDF: {}", e)))?;

        let mut report = String::new();
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(page_text) => {
                    let page_text = collapse_blank_lines(&page_text);
                    if !page_text.trim().is_empty() {
                        report.push_str(&page_text);
                        report.push('\n');
                    }
                }
                Err(e) => log::debug!("Skipping page {}: {}", page_num, e),
            }
        }

        if report.trim().is_empty() {
            Ok(EMPTY_DOCUMENT_TEXT.to_string())
        } else {
            Ok(report)
        }
    }
}

impl TextExtractor for DocumentTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, AnalysisError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => self.extract_pdf(path),
            "txt" | "md" | "text" => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| AnalysisError::ReadDocument {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                if text.trim().is_empty() {
                    Ok(EMPTY_DOCUMENT_TEXT.to_string())
                } else {
                    Ok(text)
                }
            }
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Collapses runs of newlines into one.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_newline = false;
    for c in text.chars() {
        if c == '\n' {
            if prev_newline {
                continue;
            }
            prev_newline = true;
        } else {
            prev_newline = false;
        }
        out.push(c);
    }
    out
}

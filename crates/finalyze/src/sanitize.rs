//! Helpers for cleaning client-supplied names and keeping paths out of logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for log lines and span fields.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client filename to its last path component, trimmed.
///
/// Both `/` and `\` count as separators since uploads come from any OS.
/// Returns `None` when nothing usable is left.
pub fn clean_filename(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Lower-case extension of `filename`, restricted to ASCII alphanumerics.
/// Falls back to `pdf` when the name has no usable extension.
pub fn file_extension(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        "pdf".to_string()
    }
}

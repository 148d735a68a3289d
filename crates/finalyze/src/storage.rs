use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::sanitize::file_extension;

/// Keeps uploaded documents on disk until a worker is done with them.
///
/// Each upload lands at `<directory>/document_<job_id>.<ext>`. Job ids are
/// unique, so files are created exclusively and never overwritten.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    directory: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Path an upload for `job_id` named `filename` is stored under.
    pub fn path_for(&self, job_id: &str, filename: &str) -> PathBuf {
        self.directory
            .join(format!("document_{}.{}", job_id, file_extension(filename)))
    }

    pub fn store(
        &self,
        job_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.directory).map_err(|e| StorageError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let path = self.path_for(job_id, filename);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(StorageError::WriteFile { path, source: e });
        }

        Ok(path)
    }

    /// Deletes an artifact. Returns false if it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

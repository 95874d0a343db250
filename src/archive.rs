//! Persistence of raw outputs after a successful request.
//!
//! The pipeline only triggers archival; the storage format belongs to the
//! [`OutputArchive`] implementation. [`DirectoryArchive`] reproduces the
//! classic layout: one Markdown file per request named
//! `<prefix>_output_<YYYYmmdd_HHMMSS>.md`.

use crate::error::ExtractError;
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

/// Sink for raw request outputs.
#[async_trait]
pub trait OutputArchive: Send + Sync {
    /// Persist `content` under a name derived from `prefix`.
    /// Returns a human-readable location for logs.
    async fn save(&self, prefix: &str, content: &str) -> Result<String, ExtractError>;
}

/// Writes each output to its own file inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    dir: PathBuf,
}

impl DirectoryArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(prefix: &str) -> String {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        format!("{prefix}_output_{timestamp}.md")
    }
}

impl Default for DirectoryArchive {
    fn default() -> Self {
        Self::new("outputs")
    }
}

#[async_trait]
impl OutputArchive for DirectoryArchive {
    async fn save(&self, prefix: &str, content: &str) -> Result<String, ExtractError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ExtractError::OutputWriteFailed {
                path: self.dir.clone(),
                source: e,
            })?;

        // Atomic write: temp file then rename, so readers never see half a file.
        let path = self.dir.join(Self::file_name(prefix));
        let tmp_path = path.with_extension("md.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| ExtractError::OutputWriteFailed {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ExtractError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        info!("Saved output to: {}", path.display());
        Ok(path.display().to_string())
    }
}

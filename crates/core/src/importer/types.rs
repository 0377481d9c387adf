//! Importer configuration, reports and errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::dump::DumpError;
use crate::object_store::ObjectStoreError;
use crate::upstream::UpstreamError;

/// Import pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Scratch directory for downloads and archive processing.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Object store bucket archives are uploaded to.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Fixed delay between items in a batch, applied regardless of outcome
    /// to keep pressure off the download endpoint.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Backoff applied when the download endpoint rate-limits. This is
    /// deliberately much longer than the metadata client's backoff; the
    /// download endpoint is rate-limited independently.
    #[serde(default = "default_download_backoff_secs")]
    pub download_backoff_secs: u64,
    /// Maximum download attempts per archive.
    #[serde(default = "default_download_max_attempts")]
    pub download_max_attempts: u32,
    /// Incremental discovery stops after this many consecutive pages with
    /// no unseen sets.
    #[serde(default = "default_seen_page_threshold")]
    pub recents_seen_page_threshold: u32,
    /// Emit a batch progress log line every N items.
    #[serde(default = "default_progress_log_every")]
    pub progress_log_every: u32,
    /// File extensions treated as large embedded media during stripping.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work/import")
}

fn default_bucket() -> String {
    "archives".to_string()
}

fn default_pacing_ms() -> u64 {
    5_000
}

fn default_download_backoff_secs() -> u64 {
    300
}

fn default_download_max_attempts() -> u32 {
    5
}

fn default_seen_page_threshold() -> u32 {
    3
}

fn default_progress_log_every() -> u32 {
    50
}

fn default_media_extensions() -> Vec<String> {
    ["mp4", "avi", "flv", "mpg", "m4v", "mov", "wmv", "webm"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            bucket: default_bucket(),
            pacing_ms: default_pacing_ms(),
            download_backoff_secs: default_download_backoff_secs(),
            download_max_attempts: default_download_max_attempts(),
            recents_seen_page_threshold: default_seen_page_threshold(),
            progress_log_every: default_progress_log_every(),
            media_extensions: default_media_extensions(),
        }
    }
}

/// Outcome counters for one import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl BatchReport {
    /// Whether every attempted item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Errors from the import pipeline.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] ObjectStoreError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.pacing_ms, 5_000);
        assert_eq!(config.download_backoff_secs, 300);
        assert_eq!(config.recents_seen_page_threshold, 3);
        assert!(config.media_extensions.iter().any(|e| e == "mp4"));
    }

    #[test]
    fn test_batch_report_completeness() {
        let report = BatchReport {
            attempted: 10,
            succeeded: 10,
            failed: 0,
        };
        assert!(report.is_complete());

        let report = BatchReport {
            attempted: 10,
            succeeded: 9,
            failed: 1,
        };
        assert!(!report.is_complete());
    }
}

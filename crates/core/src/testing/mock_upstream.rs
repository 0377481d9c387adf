//! Mock upstream API for tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::upstream::{RecentPage, UpstreamApi, UpstreamError, UpstreamSet};

/// In-memory upstream with configurable sets, archives and failures.
#[derive(Default)]
pub struct MockUpstream {
    sets: Mutex<HashMap<u64, UpstreamSet>>,
    archives: Mutex<HashMap<u64, Vec<u8>>>,
    chart_files: Mutex<HashMap<u64, Vec<u8>>>,
    permanent_failures: Mutex<HashSet<u64>>,
    /// Remaining 429 responses to serve per set before a download succeeds.
    download_rate_limits: Mutex<HashMap<u64, u32>>,
    recent_pages: Mutex<Vec<Vec<UpstreamSet>>>,
    fetch_calls: AtomicU32,
    download_calls: AtomicU32,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a set and the archive bytes its download serves.
    pub fn insert_set(&self, set: UpstreamSet, archive: Vec<u8>) {
        self.permanent_failures.lock().unwrap().remove(&set.id);
        self.archives.lock().unwrap().insert(set.id, archive);
        self.sets.lock().unwrap().insert(set.id, set);
    }

    /// Register a set without any archive (downloads will 404).
    pub fn insert_set_metadata(&self, set: UpstreamSet) {
        self.sets.lock().unwrap().insert(set.id, set);
    }

    /// Register the raw file served for a single chart.
    pub fn insert_chart_file(&self, chart_id: u64, content: Vec<u8>) {
        self.chart_files.lock().unwrap().insert(chart_id, content);
    }

    /// Make metadata fetches for this set fail permanently.
    pub fn fail_set(&self, set_id: u64) {
        self.permanent_failures.lock().unwrap().insert(set_id);
    }

    /// Serve `count` 429 responses for this set's archive download before
    /// letting it succeed.
    pub fn rate_limit_download(&self, set_id: u64, count: u32) {
        self.download_rate_limits
            .lock()
            .unwrap()
            .insert(set_id, count);
    }

    /// Configure the pages served by the recently-ranked listing.
    pub fn set_recent_pages(&self, pages: Vec<Vec<UpstreamSet>>) {
        *self.recent_pages.lock().unwrap() = pages;
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamApi for MockUpstream {
    async fn fetch_set(&self, set_id: u64) -> Result<UpstreamSet, UpstreamError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent_failures.lock().unwrap().contains(&set_id) {
            return Err(UpstreamError::Client {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        self.sets
            .lock()
            .unwrap()
            .get(&set_id)
            .cloned()
            .ok_or(UpstreamError::Client {
                status: 404,
                body: "not found".to_string(),
            })
    }

    async fn recent_ranked(&self, cursor: Option<&str>) -> Result<RecentPage, UpstreamError> {
        let pages = self.recent_pages.lock().unwrap();
        let index: usize = match cursor {
            Some(c) => c.parse().map_err(|_| UpstreamError::Client {
                status: 400,
                body: "bad cursor".to_string(),
            })?,
            None => 0,
        };
        let sets = pages.get(index).cloned().unwrap_or_default();
        let cursor = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(RecentPage { sets, cursor })
    }

    async fn download_archive(&self, set_id: u64, dest: &Path) -> Result<(), UpstreamError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut limits = self.download_rate_limits.lock().unwrap();
            if let Some(remaining) = limits.get_mut(&set_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(UpstreamError::RateLimited);
                }
            }
        }

        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(&set_id)
            .cloned()
            .ok_or(UpstreamError::Client {
                status: 404,
                body: "no archive".to_string(),
            })?;
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))
    }

    async fn download_chart_file(&self, chart_id: u64, dest: &Path) -> Result<(), UpstreamError> {
        let bytes = self
            .chart_files
            .lock()
            .unwrap()
            .get(&chart_id)
            .cloned()
            .ok_or(UpstreamError::Client {
                status: 404,
                body: "no chart file".to_string(),
            })?;
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))
    }
}

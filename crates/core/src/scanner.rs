//! Periodic change detection against the upstream.
//!
//! Re-fetches already-catalogued sets and re-runs the full import pipeline
//! for any set whose identity-stable metadata drifted. Generated fields
//! (storage keys, hashes, sizes) are excluded from comparison because they
//! only exist locally.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Chart, ChartSet, SqliteCatalog};
use crate::importer::{ImportError, ImportOrchestrator};
use crate::metrics;
use crate::upstream::{map_upstream_set, UpstreamApi};

/// Outcome counters for one change scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned: u32,
    pub changed: u32,
    pub errors: u32,
}

/// Scans catalogued sets for upstream drift and triggers re-imports.
pub struct ChangeScanner {
    upstream: Arc<dyn UpstreamApi>,
    catalog: Arc<SqliteCatalog>,
    orchestrator: Arc<ImportOrchestrator>,
}

impl ChangeScanner {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        catalog: Arc<SqliteCatalog>,
        orchestrator: Arc<ImportOrchestrator>,
    ) -> Self {
        Self {
            upstream,
            catalog,
            orchestrator,
        }
    }

    /// Scan sets ranked at or after `since` (default: everything) and
    /// re-import any that changed. Per-set errors are logged and skipped;
    /// scanning always continues.
    pub async fn scan_for_changes(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ScanReport, ImportError> {
        let cutoff = since.unwrap_or(DateTime::UNIX_EPOCH);
        let set_ids = self.catalog.set_ids_ranked_since(cutoff)?;
        info!(
            "Scanning {} sets ranked since {} for upstream changes",
            set_ids.len(),
            cutoff
        );

        let mut report = ScanReport::default();
        for set_id in set_ids {
            report.scanned += 1;
            match self.check_one(set_id).await {
                Ok(false) => {}
                Ok(true) => {
                    info!("Set {} changed upstream, re-importing", set_id);
                    metrics::SCAN_CHANGES_DETECTED.inc();
                    report.changed += 1;
                    let batch = self.orchestrator.import_sets(&[set_id]).await;
                    if !batch.is_complete() {
                        report.errors += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!("Change scan failed for set {}: {}", set_id, e);
                }
            }
        }

        info!(
            "Change scan done: {} scanned, {} changed, {} errors",
            report.scanned, report.changed, report.errors
        );
        Ok(report)
    }

    async fn check_one(&self, set_id: u64) -> Result<bool, ImportError> {
        let Some(stored) = self.catalog.get_set(set_id)? else {
            debug!("Set {} vanished from catalog mid-scan, skipping", set_id);
            return Ok(false);
        };
        let fresh = map_upstream_set(self.upstream.fetch_set(set_id).await?)?;
        Ok(set_changed(&stored, &fresh))
    }
}

/// Field-by-field comparison across the allow-list of identity-stable
/// columns. Primary keys and locally generated fields are excluded. A chart
/// count mismatch, or any field mismatch for charts present in both, also
/// counts as a change.
pub fn set_changed(stored: &ChartSet, fresh: &ChartSet) -> bool {
    if stored.title != fresh.title
        || stored.artist != fresh.artist
        || stored.creator != fresh.creator
        || stored.source != fresh.source
        || stored.language != fresh.language
        || stored.genre != fresh.genre
        || stored.tags != fresh.tags
        || stored.status != fresh.status
        || stored.time_submitted != fresh.time_submitted
        || stored.time_ranked != fresh.time_ranked
        || stored.download_disabled != fresh.download_disabled
        || stored.nsfw != fresh.nsfw
        || stored.has_alt_media != fresh.has_alt_media
    {
        return true;
    }

    if stored.charts.len() != fresh.charts.len() {
        return true;
    }

    for fresh_chart in &fresh.charts {
        let Some(stored_chart) = stored.charts.iter().find(|c| c.id == fresh_chart.id) else {
            continue;
        };
        if chart_changed(stored_chart, fresh_chart) {
            return true;
        }
    }

    false
}

fn chart_changed(stored: &Chart, fresh: &Chart) -> bool {
    stored.mode != fresh.mode
        || stored.status != fresh.status
        || stored.version != fresh.version
        || stored.stars != fresh.stars
        || stored.bpm != fresh.bpm
        || stored.length_secs != fresh.length_secs
        || stored.note_size != fresh.note_size
        || stored.approach != fresh.approach
        || stored.accuracy != fresh.accuracy
        || stored.drain != fresh.drain
        || stored.count_taps != fresh.count_taps
        || stored.count_holds != fresh.count_holds
        || stored.count_spins != fresh.count_spins
}

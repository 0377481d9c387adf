//! The import orchestrator: drives each set through the pipeline and owns
//! batch bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use super::media;
use super::types::{BatchReport, ImportConfig, ImportError};
use crate::catalog::{ChartSet, SqliteCatalog, VariantDescriptor};
use crate::dump::{DumpError, DumpStreamParser};
use crate::metrics;
use crate::object_store::ObjectStore;
use crate::upstream::{map_upstream_set, UpstreamApi, UpstreamError};

/// Versioned key prefix for uploaded archive variants.
const STORAGE_PREFIX: &str = "sets/v1";

/// Meta key holding the completion watermark of the last full dump import.
const DUMP_WATERMARK_KEY: &str = "dump_watermark";

/// Dump table the bulk import reads set IDs from.
const DUMP_SETS_TABLE: &str = "chart_sets";

const DUMP_READ_CHUNK: usize = 64 * 1024;

/// Drives sets through fetch -> download -> media processing -> upload ->
/// persist. Batches are strictly sequential per set; separate triggers may
/// run concurrently as independent batches because per-set persistence is
/// transactional (last committed wins).
pub struct ImportOrchestrator {
    config: ImportConfig,
    upstream: Arc<dyn UpstreamApi>,
    catalog: Arc<SqliteCatalog>,
    store: Arc<dyn ObjectStore>,
}

impl ImportOrchestrator {
    pub fn new(
        config: ImportConfig,
        upstream: Arc<dyn UpstreamApi>,
        catalog: Arc<SqliteCatalog>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            upstream,
            catalog,
            store,
        }
    }

    /// Import the given set IDs, one at a time. Per-set failures are logged
    /// and counted; the batch always runs to the end. Returns the batch's
    /// outcome counters (the success count is what callers usually want).
    pub async fn import_sets(&self, set_ids: &[u64]) -> BatchReport {
        let mut report = BatchReport::default();
        let started = Instant::now();

        for (index, &set_id) in set_ids.iter().enumerate() {
            report.attempted += 1;
            let item_started = Instant::now();

            match self.import_one(set_id).await {
                Ok(()) => {
                    report.succeeded += 1;
                    metrics::IMPORT_ATTEMPTS.with_label_values(&["ok"]).inc();
                    metrics::IMPORT_DURATION
                        .with_label_values(&["ok"])
                        .observe(item_started.elapsed().as_secs_f64());
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::IMPORT_ATTEMPTS.with_label_values(&["failed"]).inc();
                    metrics::IMPORT_DURATION
                        .with_label_values(&["failed"])
                        .observe(item_started.elapsed().as_secs_f64());
                    error!("Import failed for set {}: {}", set_id, e);
                }
            }

            let done = index + 1;
            let log_every = self.config.progress_log_every.max(1) as usize;
            if done % log_every == 0 {
                let per_min = done as f64 / started.elapsed().as_secs_f64().max(0.001) * 60.0;
                info!(
                    "Import progress: {}/{} sets ({:.1}/min, {} failed)",
                    done,
                    set_ids.len(),
                    per_min,
                    report.failed
                );
            }

            if done < set_ids.len() {
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }
        }

        info!(
            "Batch finished: {} attempted, {} succeeded, {} failed in {:?}",
            report.attempted,
            report.succeeded,
            report.failed,
            started.elapsed()
        );
        report
    }

    /// Import one set through the full pipeline.
    pub async fn import_one(&self, set_id: u64) -> Result<(), ImportError> {
        let started = Instant::now();
        debug!("Importing set {}", set_id);

        let upstream_set = self.upstream.fetch_set(set_id).await?;
        let mut set = map_upstream_set(upstream_set)?;

        let work = self.config.work_dir.join(format!("import-{set_id}"));
        tokio::fs::create_dir_all(&work).await?;
        let result = self.run_pipeline(&mut set, &work).await;
        let _ = tokio::fs::remove_dir_all(&work).await;
        result?;

        info!(
            "Imported set {} \"{} - {}\" ({} charts) in {:?}",
            set.id,
            set.artist,
            set.title,
            set.charts.len(),
            started.elapsed()
        );
        Ok(())
    }

    async fn run_pipeline(&self, set: &mut ChartSet, work: &Path) -> Result<(), ImportError> {
        // Downloading
        let archive = if set.download_disabled {
            self.synthesize_archive(set, work).await?
        } else {
            self.download_with_backoff(set.id, work).await?
        };

        // MediaProcessing: optional, and never fatal. A failed strip
        // degrades to the unstripped archive as the sole variant.
        let mut stripped_path = archive.clone();
        let mut alt_path: Option<PathBuf> = None;
        if set.has_alt_media && !set.download_disabled {
            let scratch = work.join("extract");
            let out = work.join(format!("{}-stripped.zip", set.id));
            match media::strip_alt_media(&archive, &scratch, &out, &self.config.media_extensions)
                .await
            {
                Ok(outcome) => {
                    if let Some(path) = outcome.stripped_path {
                        debug!(
                            "Removed {} media files from set {}",
                            outcome.files_removed, set.id
                        );
                        alt_path = Some(archive.clone());
                        stripped_path = path;
                    }
                }
                Err(e) => {
                    warn!(
                        "Media stripping failed for set {}: {}; keeping unstripped archive as sole variant",
                        set.id, e
                    );
                }
            }
        }

        // Uploading
        let stripped_key = self.storage_key(set, false);
        set.stripped = Some(self.upload_variant(&stripped_path, stripped_key).await?);
        set.alt_variant = match alt_path {
            Some(path) => Some(self.upload_variant(&path, self.storage_key(set, true)).await?),
            None => None,
        };

        // Persisting
        self.catalog.replace_set(set)?;
        Ok(())
    }

    /// Bulk import from a dump stream: collect every set ID from the sets
    /// table, then run a normal batch over them. The completion watermark
    /// only advances when the whole batch succeeded, so a partially failed
    /// run is retried wholesale on the next cycle.
    pub async fn import_from_dump<R>(&self, reader: R) -> Result<BatchReport, ImportError>
    where
        R: AsyncRead + Unpin,
    {
        let set_ids = collect_dump_set_ids(reader, DUMP_SETS_TABLE).await?;
        info!("Dump stream yielded {} set IDs", set_ids.len());

        let report = self.import_sets(&set_ids).await;
        if report.is_complete() {
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            self.catalog.write_meta(DUMP_WATERMARK_KEY, &now)?;
            info!("Dump import complete; watermark advanced to {}", now);
        } else {
            warn!(
                "Dump import left {} sets failed; watermark not advanced",
                report.failed
            );
        }
        Ok(report)
    }

    /// Incremental import of newly published sets. Pages the recently
    /// ranked listing and stops after a configured number of consecutive
    /// pages with no unseen sets.
    pub async fn import_from_recents(&self) -> Result<BatchReport, ImportError> {
        let mut cursor: Option<String> = None;
        let mut seen_streak = 0u32;
        let mut new_ids: Vec<u64> = Vec::new();

        loop {
            let page = self.upstream.recent_ranked(cursor.as_deref()).await?;
            if page.sets.is_empty() {
                break;
            }

            let mut unseen_on_page = 0u32;
            for set in &page.sets {
                if !self.catalog.set_exists(set.id)? {
                    new_ids.push(set.id);
                    unseen_on_page += 1;
                }
            }

            if unseen_on_page == 0 {
                seen_streak += 1;
                if seen_streak >= self.config.recents_seen_page_threshold {
                    break;
                }
            } else {
                seen_streak = 0;
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if new_ids.is_empty() {
            debug!("No unseen sets in recent listing");
            return Ok(BatchReport::default());
        }

        info!("Recent listing yielded {} unseen sets", new_ids.len());
        Ok(self.import_sets(&new_ids).await)
    }

    /// Download a set's archive, backing off on the download endpoint's own
    /// rate limit. This backoff is much longer than the metadata client's;
    /// the two budgets are independent.
    async fn download_with_backoff(
        &self,
        set_id: u64,
        work: &Path,
    ) -> Result<PathBuf, ImportError> {
        let dest = work.join(format!("{set_id}.zip"));
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upstream.download_archive(set_id, &dest).await {
                Ok(()) => return Ok(dest),
                Err(UpstreamError::RateLimited)
                    if attempt < self.config.download_max_attempts =>
                {
                    warn!(
                        "Download rate-limited for set {} (attempt {}/{}), backing off {}s",
                        set_id, attempt, self.config.download_max_attempts,
                        self.config.download_backoff_secs
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.download_backoff_secs))
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn download_chart_with_backoff(
        &self,
        chart_id: u64,
        dest: &Path,
    ) -> Result<(), ImportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upstream.download_chart_file(chart_id, dest).await {
                Ok(()) => return Ok(()),
                Err(UpstreamError::RateLimited)
                    if attempt < self.config.download_max_attempts =>
                {
                    warn!(
                        "Download rate-limited for chart {} (attempt {}/{}), backing off {}s",
                        chart_id, attempt, self.config.download_max_attempts,
                        self.config.download_backoff_secs
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.download_backoff_secs))
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Rebuild an archive for a set whose downloads are disabled: fetch
    /// each chart's raw file, zip the collection, delete the loose files.
    async fn synthesize_archive(
        &self,
        set: &ChartSet,
        work: &Path,
    ) -> Result<PathBuf, ImportError> {
        info!(
            "Downloads disabled for set {}; rebuilding archive from {} chart files",
            set.id,
            set.charts.len()
        );
        let files_dir = work.join("charts");
        tokio::fs::create_dir_all(&files_dir).await?;

        let mut paths = Vec::with_capacity(set.charts.len());
        for chart in &set.charts {
            let dest = files_dir.join(format!("{}.chart", chart.id));
            self.download_chart_with_backoff(chart.id, &dest).await?;
            paths.push(dest);
        }

        let out = work.join(format!("{}.zip", set.id));
        media::zip_files(&paths, &out).await?;
        tokio::fs::remove_dir_all(&files_dir).await?;
        Ok(out)
    }

    async fn upload_variant(
        &self,
        path: &Path,
        key: String,
    ) -> Result<VariantDescriptor, ImportError> {
        let (sha256, size_bytes) = media::hash_and_size(path).await?;
        self.store
            .upload_file(&self.config.bucket, &key, path, "application/zip")
            .await?;
        Ok(VariantDescriptor {
            key,
            size_bytes,
            sha256,
        })
    }

    /// Deterministic storage key for a variant. Rebuilt archives carry a
    /// disambiguating suffix so they never collide with a later upstream
    /// archive for the same set.
    fn storage_key(&self, set: &ChartSet, alt: bool) -> String {
        if alt {
            format!("{STORAGE_PREFIX}/{}-full.zip", set.id)
        } else if set.download_disabled {
            format!("{STORAGE_PREFIX}/{}-rebuilt.zip", set.id)
        } else {
            format!("{STORAGE_PREFIX}/{}.zip", set.id)
        }
    }

    /// Timestamp of the last fully successful dump import, if any.
    pub fn dump_watermark(&self) -> Result<Option<String>, ImportError> {
        Ok(self.catalog.read_meta(DUMP_WATERMARK_KEY)?)
    }
}

/// Stream a dump and collect the IDs of every row in the sets table.
/// Structural problems (missing schema, malformed rows) abort the run; no
/// row can be trusted without a column mapping.
async fn collect_dump_set_ids<R>(mut reader: R, table: &str) -> Result<Vec<u64>, ImportError>
where
    R: AsyncRead + Unpin,
{
    let mut parser = DumpStreamParser::new(table);
    let mut raw = vec![0u8; DUMP_READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();
    let mut ids = Vec::new();

    loop {
        let n = reader.read(&mut raw).await.map_err(DumpError::Io)?;
        if n == 0 {
            break;
        }
        carry.extend_from_slice(&raw[..n]);

        // Feed only complete UTF-8; a multi-byte char split across chunks
        // stays in the carry buffer.
        let valid_up_to = match std::str::from_utf8(&carry) {
            Ok(_) => carry.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid_up_to > 0 {
            let chunk = std::str::from_utf8(&carry[..valid_up_to])
                .map_err(|e| ImportError::Archive(e.to_string()))?;
            parser.feed(chunk);
            carry.drain(..valid_up_to);
        }

        while let Some(record) = parser.next_record() {
            metrics::DUMP_ROWS_PARSED.inc();
            if !record.is_well_formed() {
                return Err(DumpError::MalformedRow {
                    table: table.to_string(),
                    values: record.values.len(),
                    columns: record.columns().len(),
                }
                .into());
            }
            if let Some(id) = record.get("id").and_then(|v| v.as_i64()) {
                ids.push(id as u64);
            }
        }
    }

    if parser.schema().is_none() {
        return Err(DumpError::SchemaNotFound(table.to_string()).into());
    }
    Ok(ids)
}

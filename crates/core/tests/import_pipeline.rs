//! Import pipeline integration tests.
//!
//! These drive the full fetch -> download -> media-strip -> upload -> persist
//! pipeline against the in-memory mocks and verify variant production,
//! idempotency, partial-failure semantics and watermark handling.

use std::sync::Arc;

use tempfile::TempDir;

use chartmirror_core::importer::media::list_zip_entries;
use chartmirror_core::testing::fixtures::{upstream_chart, upstream_set, zip_bytes};
use chartmirror_core::testing::{MemoryObjectStore, MockUpstream};
use chartmirror_core::{
    ChangeScanner, ImportConfig, ImportOrchestrator, SqliteCatalog,
};

/// Test helper wiring the orchestrator to mocks with zero delays.
struct TestHarness {
    upstream: Arc<MockUpstream>,
    catalog: Arc<SqliteCatalog>,
    store: Arc<MemoryObjectStore>,
    orchestrator: Arc<ImportOrchestrator>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upstream = Arc::new(MockUpstream::new());
        let catalog = Arc::new(SqliteCatalog::in_memory().expect("Failed to open catalog"));
        let store = Arc::new(MemoryObjectStore::new());

        let config = ImportConfig {
            work_dir: temp_dir.path().join("work"),
            pacing_ms: 0,
            download_backoff_secs: 0,
            progress_log_every: 1_000,
            ..ImportConfig::default()
        };

        let orchestrator = Arc::new(ImportOrchestrator::new(
            config,
            Arc::clone(&upstream) as Arc<dyn chartmirror_core::UpstreamApi>,
            Arc::clone(&catalog),
            Arc::clone(&store) as Arc<dyn chartmirror_core::ObjectStore>,
        ));

        Self {
            upstream,
            catalog,
            store,
            orchestrator,
            _temp_dir: temp_dir,
        }
    }

    /// Register a plain set (no alt media) with a one-entry archive.
    fn seed_plain_set(&self, id: u64) {
        let set = upstream_set(id, vec![upstream_chart(id * 10, "standard", 4.0)]);
        let archive = zip_bytes(&[("chart.txt", b"chart data".as_slice())]);
        self.upstream.insert_set(set, archive);
    }
}

#[tokio::test]
async fn test_end_to_end_alt_media_set() {
    let harness = TestHarness::new();

    let mut set = upstream_set(
        100,
        vec![
            upstream_chart(1000, "standard", 4.2),
            upstream_chart(1001, "keys", 5.6),
        ],
    );
    set.alt_media = true;
    let archive = zip_bytes(&[
        ("chart.txt", b"chart data".as_slice()),
        ("intro.mp4", b"big video payload".as_slice()),
    ]);
    harness.upstream.insert_set(set, archive);

    let report = harness.orchestrator.import_sets(&[100]).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    let stored = harness.catalog.get_set(100).unwrap().unwrap();
    assert!(stored.has_alt_media);
    let stripped = stored.stripped.expect("stripped variant always present");
    let alt = stored
        .alt_variant
        .expect("alt variant present when media was removed");

    // Two distinct uploads with differing content.
    assert_eq!(stripped.key, "sets/v1/100.zip");
    assert_eq!(alt.key, "sets/v1/100-full.zip");
    assert_ne!(stripped.sha256, alt.sha256);
    assert_ne!(stripped.size_bytes, alt.size_bytes);

    // The stripped archive excludes the media file.
    let stripped_bytes = harness.store.object("archives", &stripped.key).unwrap();
    let names = list_zip_entries(&stripped_bytes).unwrap();
    assert_eq!(names, vec!["chart.txt".to_string()]);

    let alt_bytes = harness.store.object("archives", &alt.key).unwrap();
    let names = list_zip_entries(&alt_bytes).unwrap();
    assert!(names.contains(&"intro.mp4".to_string()));
}

#[tokio::test]
async fn test_alt_media_flag_without_media_files() {
    let harness = TestHarness::new();

    // Flagged as having media, but the archive contains none: only one
    // variant may be produced and the alt descriptor must stay null.
    let mut set = upstream_set(200, vec![upstream_chart(2000, "standard", 3.0)]);
    set.alt_media = true;
    let archive = zip_bytes(&[("chart.txt", b"chart data".as_slice())]);
    harness.upstream.insert_set(set, archive);

    let report = harness.orchestrator.import_sets(&[200]).await;
    assert_eq!(report.succeeded, 1);

    let stored = harness.catalog.get_set(200).unwrap().unwrap();
    assert!(stored.stripped.is_some());
    assert!(stored.alt_variant.is_none());
    assert_eq!(harness.store.object_count(), 1);
}

#[tokio::test]
async fn test_corrupt_archive_degrades_to_single_variant() {
    let harness = TestHarness::new();

    let mut set = upstream_set(300, vec![upstream_chart(3000, "standard", 3.0)]);
    set.alt_media = true;
    // Not a zip; media stripping fails and is swallowed.
    harness.upstream.insert_set(set, b"not a zip at all".to_vec());

    let report = harness.orchestrator.import_sets(&[300]).await;
    assert_eq!(report.succeeded, 1);

    let stored = harness.catalog.get_set(300).unwrap().unwrap();
    assert!(stored.stripped.is_some());
    assert!(stored.alt_variant.is_none());
}

#[tokio::test]
async fn test_import_idempotency() {
    let harness = TestHarness::new();
    let set = upstream_set(
        100,
        vec![
            upstream_chart(1000, "standard", 4.0),
            upstream_chart(1001, "keys", 5.0),
        ],
    );
    let archive = zip_bytes(&[("chart.txt", b"chart data".as_slice())]);
    harness.upstream.insert_set(set, archive);

    let first = harness.orchestrator.import_sets(&[100]).await;
    let second = harness.orchestrator.import_sets(&[100]).await;
    assert_eq!(first.succeeded, 1);
    assert_eq!(second.succeeded, 1);

    let stats = harness.catalog.stats().unwrap();
    assert_eq!(stats.total_sets, 1);
    assert_eq!(stats.total_charts, 2);
    assert_eq!(stats.total_index_entries, 2);
}

#[tokio::test]
async fn test_partial_failure_batch_semantics() {
    let harness = TestHarness::new();
    let ids: Vec<u64> = (1..=10).collect();
    for &id in &ids {
        if id == 4 {
            harness.upstream.fail_set(id);
        } else {
            harness.seed_plain_set(id);
        }
    }

    let report = harness.orchestrator.import_sets(&ids).await;
    assert_eq!(report.attempted, 10);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 1);
    assert_eq!(harness.catalog.count_sets().unwrap(), 9);
    assert!(harness.catalog.get_set(4).unwrap().is_none());
}

fn dump_for_ids(ids: &[u64]) -> String {
    let rows = ids
        .iter()
        .map(|id| format!("({id},'Set {id}')"))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "CREATE TABLE `chart_sets` (\n  `id` bigint NOT NULL,\n  `title` text,\n  PRIMARY KEY (`id`)\n);\n\
         INSERT INTO `chart_sets` VALUES {rows};\n"
    )
}

#[tokio::test]
async fn test_dump_import_watermark_only_on_full_success() {
    let harness = TestHarness::new();
    let ids: Vec<u64> = (1..=5).collect();
    for &id in &ids {
        if id == 4 {
            harness.upstream.fail_set(id);
        } else {
            harness.seed_plain_set(id);
        }
    }

    let dump = dump_for_ids(&ids);
    let report = harness
        .orchestrator
        .import_from_dump(dump.as_bytes())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    // A partially failed batch must not advance the watermark; the next
    // scheduled run retries the dump wholesale.
    assert!(harness.orchestrator.dump_watermark().unwrap().is_none());

    // Fix the failing set and retry: everything succeeds and the watermark
    // advances.
    harness.seed_plain_set(4);
    let report = harness
        .orchestrator
        .import_from_dump(dump.as_bytes())
        .await
        .unwrap();
    assert_eq!(report.failed, 0);
    assert!(harness.orchestrator.dump_watermark().unwrap().is_some());
}

#[tokio::test]
async fn test_dump_without_target_table_aborts() {
    let harness = TestHarness::new();
    let dump = "CREATE TABLE `unrelated` (\n  `id` bigint\n);\nINSERT INTO `unrelated` VALUES (1);";
    let result = harness.orchestrator.import_from_dump(dump.as_bytes()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_download_disabled_synthesizes_archive() {
    let harness = TestHarness::new();

    let mut set = upstream_set(
        500,
        vec![
            upstream_chart(5000, "standard", 4.0),
            upstream_chart(5001, "standard", 5.0),
        ],
    );
    set.availability.download_disabled = true;
    // No archive registered: the pipeline must not hit the archive endpoint.
    harness.upstream.insert_set_metadata(set);
    harness.upstream.insert_chart_file(5000, b"chart five thousand".to_vec());
    harness.upstream.insert_chart_file(5001, b"chart five thousand one".to_vec());

    let report = harness.orchestrator.import_sets(&[500]).await;
    assert_eq!(report.succeeded, 1);

    let stored = harness.catalog.get_set(500).unwrap().unwrap();
    let stripped = stored.stripped.unwrap();
    // Rebuilt archives carry the disambiguating key suffix.
    assert_eq!(stripped.key, "sets/v1/500-rebuilt.zip");

    let bytes = harness.store.object("archives", &stripped.key).unwrap();
    let names = list_zip_entries(&bytes).unwrap();
    assert_eq!(
        names,
        vec!["5000.chart".to_string(), "5001.chart".to_string()]
    );
}

#[tokio::test]
async fn test_download_rate_limit_backoff_then_success() {
    let harness = TestHarness::new();
    harness.seed_plain_set(600);
    harness.upstream.rate_limit_download(600, 2);

    let report = harness.orchestrator.import_sets(&[600]).await;
    assert_eq!(report.succeeded, 1);
    // Two 429 responses plus the successful attempt.
    assert_eq!(harness.upstream.download_calls(), 3);
}

#[tokio::test]
async fn test_recents_stops_after_consecutive_seen_pages() {
    let harness = TestHarness::new();

    // Sets 1 and 2 are already catalogued.
    harness.seed_plain_set(1);
    harness.seed_plain_set(2);
    harness.orchestrator.import_sets(&[1, 2]).await;

    // Page layout: one unseen set, then three fully-seen pages (hitting the
    // threshold), then another unseen set that must never be reached.
    harness.seed_plain_set(7);
    harness.seed_plain_set(8);
    harness.upstream.set_recent_pages(vec![
        vec![upstream_set(7, vec![upstream_chart(70, "standard", 4.0)])],
        vec![upstream_set(1, vec![upstream_chart(10, "standard", 4.0)])],
        vec![upstream_set(2, vec![upstream_chart(20, "standard", 4.0)])],
        vec![upstream_set(1, vec![upstream_chart(10, "standard", 4.0)])],
        vec![upstream_set(8, vec![upstream_chart(80, "standard", 4.0)])],
    ]);

    let report = harness.orchestrator.import_from_recents().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert!(harness.catalog.set_exists(7).unwrap());
    assert!(!harness.catalog.set_exists(8).unwrap());
}

#[tokio::test]
async fn test_change_scan_reimports_drifted_sets() {
    let harness = TestHarness::new();
    harness.seed_plain_set(1);
    harness.seed_plain_set(2);
    harness.orchestrator.import_sets(&[1, 2]).await;

    // Set 2 changes its title upstream.
    let mut changed = upstream_set(2, vec![upstream_chart(20, "standard", 4.0)]);
    changed.title = "Renamed Upstream".to_string();
    let archive = zip_bytes(&[("chart.txt", b"chart data".as_slice())]);
    harness.upstream.insert_set(changed, archive);

    let scanner = ChangeScanner::new(
        Arc::clone(&harness.upstream) as Arc<dyn chartmirror_core::UpstreamApi>,
        Arc::clone(&harness.catalog),
        Arc::clone(&harness.orchestrator),
    );
    let report = scanner.scan_for_changes(None).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.changed, 1);
    assert_eq!(report.errors, 0);
    let stored = harness.catalog.get_set(2).unwrap().unwrap();
    assert_eq!(stored.title, "Renamed Upstream");
}

#[tokio::test]
async fn test_change_scan_continues_past_errors() {
    let harness = TestHarness::new();
    harness.seed_plain_set(1);
    harness.seed_plain_set(2);
    harness.orchestrator.import_sets(&[1, 2]).await;

    // Set 1's metadata fetch now fails; set 2 changed.
    harness.upstream.fail_set(1);
    let mut changed = upstream_set(2, vec![upstream_chart(20, "standard", 4.0)]);
    changed.tags = Some("fresh tags".to_string());
    let archive = zip_bytes(&[("chart.txt", b"chart data".as_slice())]);
    harness.upstream.insert_set(changed, archive);

    let scanner = ChangeScanner::new(
        Arc::clone(&harness.upstream) as Arc<dyn chartmirror_core::UpstreamApi>,
        Arc::clone(&harness.catalog),
        Arc::clone(&harness.orchestrator),
    );
    let report = scanner.scan_for_changes(None).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.changed, 1);
    assert_eq!(report.errors, 1);
}

//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Importer (attempts, durations, dump rows)
//! - Upstream client (request outcomes, throttle sleeps)
//! - Change scanner and pack GC

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// =============================================================================
// Importer
// =============================================================================

/// Import attempts total by result ("ok" / "failed").
pub static IMPORT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chartmirror_import_attempts_total", "Total import attempts"),
        &["result"],
    )
    .unwrap()
});

/// Per-set import duration in seconds.
pub static IMPORT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "chartmirror_import_duration_seconds",
            "Duration of one set import",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["result"],
    )
    .unwrap()
});

/// Rows emitted by the dump parser.
pub static DUMP_ROWS_PARSED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chartmirror_dump_rows_parsed_total",
        "Rows parsed from bulk dump streams",
    )
    .unwrap()
});

// =============================================================================
// Upstream client
// =============================================================================

/// Upstream requests by outcome ("ok" / "rate_limited" / "server_error" /
/// "client_error" / "network_error").
pub static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chartmirror_upstream_requests_total",
            "Upstream API requests by outcome",
        ),
        &["outcome"],
    )
    .unwrap()
});

/// Times the rate governor slept before a request.
pub static UPSTREAM_THROTTLE_SLEEPS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chartmirror_upstream_throttle_sleeps_total",
        "Requests delayed by the client-side rate governor",
    )
    .unwrap()
});

// =============================================================================
// Scanner and packs
// =============================================================================

/// Upstream changes detected by the scanner.
pub static SCAN_CHANGES_DETECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chartmirror_scan_changes_total",
        "Sets re-imported after upstream drift was detected",
    )
    .unwrap()
});

/// Pack content entries garbage-collected.
pub static PACK_CONTENT_GC: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chartmirror_pack_content_gc_total",
        "Pack content entries deleted by reference-counted GC",
    )
    .unwrap()
});

/// Register all metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(IMPORT_ATTEMPTS.clone()))?;
    registry.register(Box::new(IMPORT_DURATION.clone()))?;
    registry.register(Box::new(DUMP_ROWS_PARSED.clone()))?;
    registry.register(Box::new(UPSTREAM_REQUESTS.clone()))?;
    registry.register(Box::new(UPSTREAM_THROTTLE_SLEEPS.clone()))?;
    registry.register(Box::new(SCAN_CHANGES_DETECTED.clone()))?;
    registry.register(Box::new(PACK_CONTENT_GC.clone()))?;
    Ok(())
}

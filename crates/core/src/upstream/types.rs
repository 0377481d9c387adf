//! Upstream wire types and their mapping into catalog records.
//!
//! Mapping is done by explicit per-entity functions that name every field,
//! so an upstream field rename becomes a compile/decode error instead of a
//! silently dropped column.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::UpstreamError;
use crate::catalog::{Chart, ChartSet, PlayMode, SetStatus};

/// A chart set as returned by the upstream API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSet {
    pub id: u64,
    pub title: String,
    pub artist: String,
    pub creator: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    pub status: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ranked_at: Option<DateTime<Utc>>,
    /// Whether the set's archive embeds large media (video and the like).
    #[serde(default)]
    pub alt_media: bool,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub availability: UpstreamAvailability,
    #[serde(default)]
    pub charts: Vec<UpstreamChart>,
}

/// Download availability flags for a set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamAvailability {
    #[serde(default)]
    pub download_disabled: bool,
}

/// A single chart as returned by the upstream API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChart {
    pub id: u64,
    pub mode: String,
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub difficulty_rating: f64,
    #[serde(default)]
    pub bpm: f64,
    #[serde(default)]
    pub total_length: f64,
    #[serde(default)]
    pub note_size: f64,
    #[serde(default)]
    pub approach: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub drain: f64,
    #[serde(default)]
    pub count_taps: u32,
    #[serde(default)]
    pub count_holds: u32,
    #[serde(default)]
    pub count_spins: u32,
}

/// One page of the recently-ranked listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentPage {
    pub sets: Vec<UpstreamSet>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// The upstream API surface consumed by the importer and change scanner.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Fetch full metadata for one set, including its charts.
    async fn fetch_set(&self, set_id: u64) -> Result<UpstreamSet, UpstreamError>;

    /// Fetch one page of recently ranked sets. `cursor` continues a previous
    /// page's pagination.
    async fn recent_ranked(&self, cursor: Option<&str>) -> Result<RecentPage, UpstreamError>;

    /// Stream a set's full archive to `dest`. Download endpoints are
    /// rate-limited independently of the metadata budget, so this bypasses
    /// the governor; callers apply their own backoff on `RateLimited`.
    async fn download_archive(&self, set_id: u64, dest: &Path) -> Result<(), UpstreamError>;

    /// Stream a single chart's raw file to `dest`, for sets whose archive
    /// downloads are disabled.
    async fn download_chart_file(&self, chart_id: u64, dest: &Path) -> Result<(), UpstreamError>;
}

/// Map an upstream set into a catalog record. Variant descriptors are left
/// empty; they are filled in by the import pipeline's upload stage.
pub fn map_upstream_set(upstream: UpstreamSet) -> Result<ChartSet, UpstreamError> {
    let status = SetStatus::parse(&upstream.status)
        .ok_or_else(|| UpstreamError::Decode(format!("Unknown set status '{}'", upstream.status)))?;
    let charts = upstream
        .charts
        .into_iter()
        .map(|c| map_upstream_chart(upstream.id, c))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChartSet {
        id: upstream.id,
        title: upstream.title,
        artist: upstream.artist,
        creator: upstream.creator,
        source: upstream.source,
        language: upstream.language,
        genre: upstream.genre,
        tags: upstream.tags,
        status,
        time_submitted: upstream.submitted_at,
        time_ranked: upstream.ranked_at,
        download_disabled: upstream.availability.download_disabled,
        nsfw: upstream.nsfw,
        has_alt_media: upstream.alt_media,
        stripped: None,
        alt_variant: None,
        charts,
    })
}

/// Map an upstream chart into a catalog record.
pub fn map_upstream_chart(set_id: u64, upstream: UpstreamChart) -> Result<Chart, UpstreamError> {
    let mode = PlayMode::parse(&upstream.mode)
        .ok_or_else(|| UpstreamError::Decode(format!("Unknown play mode '{}'", upstream.mode)))?;
    let status = SetStatus::parse(&upstream.status).ok_or_else(|| {
        UpstreamError::Decode(format!("Unknown chart status '{}'", upstream.status))
    })?;

    Ok(Chart {
        id: upstream.id,
        set_id,
        mode,
        status,
        version: upstream.version,
        stars: upstream.difficulty_rating,
        bpm: upstream.bpm,
        length_secs: upstream.total_length,
        note_size: upstream.note_size,
        approach: upstream.approach,
        accuracy: upstream.accuracy,
        drain: upstream.drain,
        count_taps: upstream.count_taps,
        count_holds: upstream.count_holds,
        count_spins: upstream.count_spins,
    })
}

//! Types for the mirrored chart catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a set or chart, with the upstream's integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    Graveyard,
    Wip,
    Pending,
    Ranked,
    Approved,
    Qualified,
    Loved,
}

impl SetStatus {
    /// Internal integer code, as stored in the database.
    pub fn code(self) -> i64 {
        match self {
            SetStatus::Graveyard => -2,
            SetStatus::Wip => -1,
            SetStatus::Pending => 0,
            SetStatus::Ranked => 1,
            SetStatus::Approved => 2,
            SetStatus::Qualified => 3,
            SetStatus::Loved => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -2 => Some(SetStatus::Graveyard),
            -1 => Some(SetStatus::Wip),
            0 => Some(SetStatus::Pending),
            1 => Some(SetStatus::Ranked),
            2 => Some(SetStatus::Approved),
            3 => Some(SetStatus::Qualified),
            4 => Some(SetStatus::Loved),
            _ => None,
        }
    }

    /// Resolve a status name or code string to its canonical value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "graveyard" => Some(SetStatus::Graveyard),
            "wip" => Some(SetStatus::Wip),
            "pending" => Some(SetStatus::Pending),
            "ranked" => Some(SetStatus::Ranked),
            "approved" => Some(SetStatus::Approved),
            "qualified" => Some(SetStatus::Qualified),
            "loved" => Some(SetStatus::Loved),
            other => other.parse::<i64>().ok().and_then(Self::from_code),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SetStatus::Graveyard => "graveyard",
            SetStatus::Wip => "wip",
            SetStatus::Pending => "pending",
            SetStatus::Ranked => "ranked",
            SetStatus::Approved => "approved",
            SetStatus::Qualified => "qualified",
            SetStatus::Loved => "loved",
        }
    }
}

/// Play mode of a chart, with the upstream's integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    Standard,
    Drums,
    Catch,
    Keys,
}

impl PlayMode {
    pub fn code(self) -> i64 {
        match self {
            PlayMode::Standard => 0,
            PlayMode::Drums => 1,
            PlayMode::Catch => 2,
            PlayMode::Keys => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PlayMode::Standard),
            1 => Some(PlayMode::Drums),
            2 => Some(PlayMode::Catch),
            3 => Some(PlayMode::Keys),
            _ => None,
        }
    }

    /// Resolve a mode alias to its canonical value. This alias table is part
    /// of the filter language surface and must stay stable.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "standard" | "std" | "s" | "o" | "0" => Some(PlayMode::Standard),
            "drums" | "drum" | "taiko" | "t" | "1" => Some(PlayMode::Drums),
            "catch" | "ctb" | "fruits" | "c" | "2" => Some(PlayMode::Catch),
            "keys" | "mania" | "k" | "m" | "3" => Some(PlayMode::Keys),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlayMode::Standard => "standard",
            PlayMode::Drums => "drums",
            PlayMode::Catch => "catch",
            PlayMode::Keys => "keys",
        }
    }
}

/// Storage descriptor for one uploaded archive variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    /// Object store key.
    pub key: String,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Streaming SHA-256 of the archive (lowercase hex).
    pub sha256: String,
}

/// A mirrored chart set with its child charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSet {
    /// Upstream-assigned, stable ID.
    pub id: u64,
    pub title: String,
    pub artist: String,
    /// The community author who owns the set.
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    pub status: SetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_submitted: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ranked: Option<DateTime<Utc>>,
    /// Upstream refuses archive downloads for this set; its archive is
    /// synthesized from individual chart files instead.
    pub download_disabled: bool,
    pub nsfw: bool,
    /// Whether the upstream archive embeds large media.
    pub has_alt_media: bool,
    /// The media-stripped archive. Always present once the set has been
    /// imported successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripped: Option<VariantDescriptor>,
    /// The original archive including media. Present only when the set has
    /// alt media and stripping actually removed something.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_variant: Option<VariantDescriptor>,
    pub charts: Vec<Chart>,
}

/// A single chart within a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chart {
    pub id: u64,
    pub set_id: u64,
    pub mode: PlayMode,
    pub status: SetStatus,
    /// Difficulty name.
    pub version: String,
    /// Difficulty rating.
    pub stars: f64,
    pub bpm: f64,
    pub length_secs: f64,
    // Mode-specific tuning parameters.
    pub note_size: f64,
    pub approach: f64,
    pub accuracy: f64,
    pub drain: f64,
    // Object count metrics.
    pub count_taps: u32,
    pub count_holds: u32,
    pub count_spins: u32,
}

/// Search results with full set records.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub sets: Vec<ChartSet>,
    pub total_sets: u64,
    pub total_charts: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Aggregate archive sizes over a query's matching sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SizeTotals {
    pub set_count: u64,
    /// Sum of stripped-variant sizes.
    pub size_stripped: u64,
    /// Sum taking the full variant where one exists.
    pub size_full: u64,
}

/// Catalog statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total_sets: u64,
    pub total_charts: u64,
    pub total_index_entries: u64,
    /// Sum of all stored variant sizes.
    pub total_archive_bytes: u64,
}

/// Errors for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        CatalogError::Database(e.to_string())
    }
}

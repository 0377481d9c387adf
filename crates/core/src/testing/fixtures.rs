//! Shared test fixtures.

use std::io::Write;

use chrono::{TimeZone, Utc};

use crate::catalog::{Chart, ChartSet, PlayMode, SetStatus};
use crate::upstream::{UpstreamAvailability, UpstreamChart, UpstreamSet};

/// A catalog chart with sensible defaults.
pub fn chart(id: u64, set_id: u64, stars: f64) -> Chart {
    Chart {
        id,
        set_id,
        mode: PlayMode::Standard,
        status: SetStatus::Ranked,
        version: format!("Diff {id}"),
        stars,
        bpm: 180.0,
        length_secs: 95.0,
        note_size: 4.0,
        approach: 9.0,
        accuracy: 8.0,
        drain: 6.0,
        count_taps: 300,
        count_holds: 80,
        count_spins: 2,
    }
}

/// A catalog set with sensible defaults and the given charts.
pub fn chart_set(id: u64, title: &str, artist: &str, charts: &[Chart]) -> ChartSet {
    ChartSet {
        id,
        title: title.to_string(),
        artist: artist.to_string(),
        creator: "fixture-mapper".to_string(),
        source: None,
        language: Some("instrumental".to_string()),
        genre: Some("electronic".to_string()),
        tags: Some("test fixture".to_string()),
        status: SetStatus::Ranked,
        time_submitted: Utc.with_ymd_and_hms(2022, 1, 15, 12, 0, 0).single(),
        time_ranked: Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).single(),
        download_disabled: false,
        nsfw: false,
        has_alt_media: false,
        stripped: None,
        alt_variant: None,
        charts: charts.to_vec(),
    }
}

/// An upstream chart with sensible defaults.
pub fn upstream_chart(id: u64, mode: &str, stars: f64) -> UpstreamChart {
    UpstreamChart {
        id,
        mode: mode.to_string(),
        status: "ranked".to_string(),
        version: format!("Diff {id}"),
        difficulty_rating: stars,
        bpm: 180.0,
        total_length: 95.0,
        note_size: 4.0,
        approach: 9.0,
        accuracy: 8.0,
        drain: 6.0,
        count_taps: 300,
        count_holds: 80,
        count_spins: 2,
    }
}

/// An upstream set with sensible defaults and the given charts.
pub fn upstream_set(id: u64, charts: Vec<UpstreamChart>) -> UpstreamSet {
    UpstreamSet {
        id,
        title: format!("Set {id}"),
        artist: "Fixture Artist".to_string(),
        creator: "fixture-mapper".to_string(),
        source: None,
        language: Some("instrumental".to_string()),
        genre: Some("electronic".to_string()),
        tags: Some("test fixture".to_string()),
        status: "ranked".to_string(),
        submitted_at: Utc.with_ymd_and_hms(2022, 1, 15, 12, 0, 0).single(),
        ranked_at: Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).single(),
        alt_media: false,
        nsfw: false,
        availability: UpstreamAvailability {
            download_disabled: false,
        },
        charts,
    }
}

/// Build an in-memory zip archive from (name, content) entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

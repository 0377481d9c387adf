//! SQLite-backed catalog implementation.
//!
//! The connection is the single source of truth for sets, charts, the
//! full-text index and pack storage. All multi-row writes run inside one
//! transaction so a crash mid-write cannot leave chart rows and index rows
//! out of sync.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::types::{
    CatalogError, CatalogStats, Chart, ChartSet, PlayMode, SearchResults, SetStatus, SizeTotals,
    VariantDescriptor,
};
use crate::query::{self, CompiledQuery, SortKey};

/// Slice size for `IN (...)` parameter lists, kept well under SQLite's
/// bound-parameter limit.
const ID_SLICE: usize = 500;

/// SQLite-backed chart catalog.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database at the given path.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (useful for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            -- Mirrored sets, one row per upstream set ID
            CREATE TABLE IF NOT EXISTS chart_sets (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                creator TEXT NOT NULL,
                source TEXT,
                language TEXT,
                genre TEXT,
                tags TEXT,
                status INTEGER NOT NULL,
                time_submitted TEXT,
                time_ranked TEXT,
                download_disabled INTEGER NOT NULL DEFAULT 0,
                nsfw INTEGER NOT NULL DEFAULT 0,
                has_alt_media INTEGER NOT NULL DEFAULT 0,
                stripped_key TEXT,
                stripped_size INTEGER,
                stripped_hash TEXT,
                alt_key TEXT,
                alt_size INTEGER,
                alt_hash TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_chart_sets_ranked ON chart_sets(time_ranked);

            -- Child charts, replaced as a unit with their set
            CREATE TABLE IF NOT EXISTS charts (
                id INTEGER PRIMARY KEY,
                set_id INTEGER NOT NULL REFERENCES chart_sets(id) ON DELETE CASCADE,
                mode INTEGER NOT NULL,
                status INTEGER NOT NULL,
                version TEXT NOT NULL,
                stars REAL NOT NULL DEFAULT 0,
                bpm REAL NOT NULL DEFAULT 0,
                length_secs REAL NOT NULL DEFAULT 0,
                note_size REAL NOT NULL DEFAULT 0,
                approach REAL NOT NULL DEFAULT 0,
                accuracy REAL NOT NULL DEFAULT 0,
                drain REAL NOT NULL DEFAULT 0,
                count_taps INTEGER NOT NULL DEFAULT 0,
                count_holds INTEGER NOT NULL DEFAULT 0,
                count_spins INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_charts_set ON charts(set_id);
            CREATE INDEX IF NOT EXISTS idx_charts_mode_stars ON charts(mode, stars);

            -- Full-text index, one row per chart
            CREATE VIRTUAL TABLE IF NOT EXISTS chart_search USING fts5(
                chart_id UNINDEXED,
                set_id UNINDEXED,
                title,
                artist,
                creator,
                version,
                tags,
                source
            );

            -- Content-addressed, deduplicated pack membership entries
            CREATE TABLE IF NOT EXISTS pack_contents (
                hash TEXT PRIMARY KEY,
                ids_json TEXT NOT NULL,
                set_count INTEGER NOT NULL,
                size_stripped INTEGER NOT NULL DEFAULT 0,
                size_full INTEGER NOT NULL DEFAULT 0
            );

            -- Expanded membership rows for joins against the catalog
            CREATE TABLE IF NOT EXISTS pack_members (
                hash TEXT NOT NULL REFERENCES pack_contents(hash) ON DELETE CASCADE,
                set_id INTEGER NOT NULL,
                PRIMARY KEY (hash, set_id)
            );

            CREATE INDEX IF NOT EXISTS idx_pack_members_set ON pack_members(set_id);

            -- Named packs pointing at a contents entry or a stored query
            CREATE TABLE IF NOT EXISTS packs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                creator TEXT,
                contents_hash TEXT REFERENCES pack_contents(hash),
                query TEXT,
                created_at TEXT NOT NULL
            );

            -- Operational watermarks and other one-off values
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Replace a set, its charts and their index rows in one transaction.
    ///
    /// Upsert-by-primary-key semantics make re-importing the same ID always
    /// safe. Index rows are only deleted for charts that already existed, so
    /// first inserts cause no needless FTS churn.
    pub fn replace_set(&self, set: &ChartSet) -> Result<(), CatalogError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: HashSet<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM charts WHERE set_id = ?")?;
            let ids = stmt
                .query_map(params![set.id as i64], |row| row.get::<_, i64>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            ids
        };

        tx.execute("DELETE FROM charts WHERE set_id = ?", params![set.id as i64])?;
        tx.execute(
            "DELETE FROM chart_sets WHERE id = ?",
            params![set.id as i64],
        )?;

        tx.execute(
            "INSERT INTO chart_sets (
                id, title, artist, creator, source, language, genre, tags,
                status, time_submitted, time_ranked, download_disabled, nsfw,
                has_alt_media, stripped_key, stripped_size, stripped_hash,
                alt_key, alt_size, alt_hash
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                set.id as i64,
                set.title,
                set.artist,
                set.creator,
                set.source,
                set.language,
                set.genre,
                set.tags,
                set.status.code(),
                set.time_submitted.map(format_ts),
                set.time_ranked.map(format_ts),
                set.download_disabled as i64,
                set.nsfw as i64,
                set.has_alt_media as i64,
                set.stripped.as_ref().map(|v| v.key.clone()),
                set.stripped.as_ref().map(|v| v.size_bytes as i64),
                set.stripped.as_ref().map(|v| v.sha256.clone()),
                set.alt_variant.as_ref().map(|v| v.key.clone()),
                set.alt_variant.as_ref().map(|v| v.size_bytes as i64),
                set.alt_variant.as_ref().map(|v| v.sha256.clone()),
            ],
        )?;

        let new_ids: HashSet<i64> = set.charts.iter().map(|c| c.id as i64).collect();
        for chart in &set.charts {
            tx.execute(
                "INSERT INTO charts (
                    id, set_id, mode, status, version, stars, bpm, length_secs,
                    note_size, approach, accuracy, drain,
                    count_taps, count_holds, count_spins
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    chart.id as i64,
                    set.id as i64,
                    chart.mode.code(),
                    chart.status.code(),
                    chart.version,
                    chart.stars,
                    chart.bpm,
                    chart.length_secs,
                    chart.note_size,
                    chart.approach,
                    chart.accuracy,
                    chart.drain,
                    chart.count_taps as i64,
                    chart.count_holds as i64,
                    chart.count_spins as i64,
                ],
            )?;

            if existing.contains(&(chart.id as i64)) {
                tx.execute(
                    "DELETE FROM chart_search WHERE chart_id = ?",
                    params![chart.id as i64],
                )?;
            }
            tx.execute(
                "INSERT INTO chart_search (
                    chart_id, set_id, title, artist, creator, version, tags, source
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    chart.id as i64,
                    set.id as i64,
                    set.title,
                    set.artist,
                    set.creator,
                    chart.version,
                    set.tags,
                    set.source,
                ],
            )?;
        }

        // Index rows for charts that disappeared upstream.
        for stale in existing.difference(&new_ids) {
            tx.execute("DELETE FROM chart_search WHERE chart_id = ?", params![stale])?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single set with its charts.
    pub fn get_set(&self, set_id: u64) -> Result<Option<ChartSet>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        Self::load_set(&conn, set_id)
    }

    /// Fetch several sets, preserving the requested ID order. Missing IDs
    /// are skipped.
    pub fn get_sets(&self, set_ids: &[u64]) -> Result<Vec<ChartSet>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut sets = Vec::with_capacity(set_ids.len());
        for &id in set_ids {
            if let Some(set) = Self::load_set(&conn, id)? {
                sets.push(set);
            }
        }
        Ok(sets)
    }

    pub fn set_exists(&self, set_id: u64) -> Result<bool, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM chart_sets WHERE id = ?",
                params![set_id as i64],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// IDs of sets ranked at or after the cutoff, ascending by ID.
    pub fn set_ids_ranked_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<u64>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM chart_sets WHERE time_ranked >= ? ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![format_ts(cutoff)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    pub fn count_sets(&self) -> Result<u64, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chart_sets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_charts(&self) -> Result<u64, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM charts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Read an operational value from the meta table.
    pub fn read_meta(&self, key: &str) -> Result<Option<String>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write an operational value to the meta table.
    pub fn write_meta(&self, key: &str, value: &str) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Search the catalog with a filter string; returns full set records
    /// sorted and paginated.
    pub fn search(
        &self,
        filter: &str,
        sort: SortKey,
        limit: u32,
        offset: u32,
    ) -> Result<SearchResults, CatalogError> {
        let compiled = query::compile(filter);
        let conn = self.conn.lock().unwrap();
        let from = compiled.from_sql();

        let totals_sql = format!(
            "SELECT COUNT(DISTINCT s.id), COUNT(*)\n{from}\n{}",
            compiled.where_sql
        );
        let (total_sets, total_charts) = conn.query_row(
            &totals_sql,
            params_from_iter(compiled.params.iter()),
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, i64>(1)? as u64,
                ))
            },
        )?;

        let ids_sql = format!(
            "SELECT s.id\n{from}\n{}\nGROUP BY s.id\nORDER BY {}\nLIMIT ? OFFSET ?",
            compiled.where_sql,
            sort.order_sql(compiled.join_search)
        );
        let mut params: Vec<Value> = compiled.params.clone();
        params.push(Value::Integer(limit as i64));
        params.push(Value::Integer(offset as i64));

        let ids: Vec<u64> = {
            let mut stmt = conn.prepare(&ids_sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(|id| id as u64).collect()
        };

        let mut sets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(set) = Self::load_set(&conn, id)? {
                sets.push(set);
            }
        }

        Ok(SearchResults {
            sets,
            total_sets,
            total_charts,
            limit,
            offset,
        })
    }

    /// Search and return only the matching set IDs, unsorted.
    pub fn search_ids(&self, filter: &str) -> Result<Vec<u64>, CatalogError> {
        let compiled = query::compile(filter);
        let conn = self.conn.lock().unwrap();
        Self::run_search_ids(&conn, &compiled)
    }

    pub(crate) fn run_search_ids(
        conn: &Connection,
        compiled: &CompiledQuery,
    ) -> Result<Vec<u64>, CatalogError> {
        let sql = format!(
            "SELECT s.id\n{}\n{}\nGROUP BY s.id",
            compiled.from_sql(),
            compiled.where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(compiled.params.iter()), |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    /// Aggregate the archive sizes of all sets matching a filter. Sets are
    /// deduplicated before summing so a set with many matching charts counts
    /// once.
    pub fn search_aggregate_sizes(&self, filter: &str) -> Result<SizeTotals, CatalogError> {
        let compiled = query::compile(filter);
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT COUNT(id),
                    COALESCE(SUM(stripped_size), 0),
                    COALESCE(SUM(CASE WHEN has_alt_media = 1 AND alt_size IS NOT NULL
                                      THEN alt_size ELSE stripped_size END), 0)
             FROM (
                SELECT DISTINCT s.id AS id, s.stripped_size AS stripped_size,
                       s.alt_size AS alt_size, s.has_alt_media AS has_alt_media
                {}
                {}
             )",
            compiled.from_sql(),
            compiled.where_sql
        );
        let totals = conn.query_row(
            &sql,
            params_from_iter(compiled.params.iter()),
            |row| {
                Ok(SizeTotals {
                    set_count: row.get::<_, i64>(0)? as u64,
                    size_stripped: row.get::<_, i64>(1)? as u64,
                    size_full: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(totals)
    }

    /// Sum variant sizes over an explicit ID list, in bounded slices to
    /// avoid oversized parameterized queries. Returns (stripped, full).
    pub fn sum_variant_sizes(&self, set_ids: &[u64]) -> Result<(u64, u64), CatalogError> {
        let conn = self.conn.lock().unwrap();
        Self::sum_variant_sizes_inner(&conn, set_ids)
    }

    pub(crate) fn sum_variant_sizes_inner(
        conn: &Connection,
        set_ids: &[u64],
    ) -> Result<(u64, u64), CatalogError> {
        let mut stripped = 0u64;
        let mut full = 0u64;
        for slice in set_ids.chunks(ID_SLICE) {
            let placeholders = vec!["?"; slice.len()].join(", ");
            let sql = format!(
                "SELECT COALESCE(SUM(stripped_size), 0),
                        COALESCE(SUM(CASE WHEN has_alt_media = 1 AND alt_size IS NOT NULL
                                          THEN alt_size ELSE stripped_size END), 0)
                 FROM chart_sets WHERE id IN ({placeholders})"
            );
            let params: Vec<Value> = slice.iter().map(|&id| Value::Integer(id as i64)).collect();
            let (s, f): (i64, i64) = conn.query_row(
                &sql,
                params_from_iter(params.iter()),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stripped += s as u64;
            full += f as u64;
        }
        Ok((stripped, full))
    }

    /// Catalog-wide counters.
    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let total_sets: i64 =
            conn.query_row("SELECT COUNT(*) FROM chart_sets", [], |row| row.get(0))?;
        let total_charts: i64 =
            conn.query_row("SELECT COUNT(*) FROM charts", [], |row| row.get(0))?;
        let total_index_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM chart_search", [], |row| row.get(0))?;
        let total_archive_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(COALESCE(stripped_size, 0) + COALESCE(alt_size, 0)), 0)
             FROM chart_sets",
            [],
            |row| row.get(0),
        )?;
        Ok(CatalogStats {
            total_sets: total_sets as u64,
            total_charts: total_charts as u64,
            total_index_entries: total_index_entries as u64,
            total_archive_bytes: total_archive_bytes as u64,
        })
    }

    /// Run the FTS maintenance command to merge index segments.
    pub fn optimize_search_index(&self) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chart_search (chart_search) VALUES ('optimize')",
            [],
        )?;
        Ok(())
    }

    fn load_set(conn: &Connection, set_id: u64) -> Result<Option<ChartSet>, CatalogError> {
        let set = conn
            .query_row(
                "SELECT id, title, artist, creator, source, language, genre, tags,
                        status, time_submitted, time_ranked, download_disabled, nsfw,
                        has_alt_media, stripped_key, stripped_size, stripped_hash,
                        alt_key, alt_size, alt_hash
                 FROM chart_sets WHERE id = ?",
                params![set_id as i64],
                Self::row_to_set,
            )
            .optional()?;

        let Some(mut set) = set else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, set_id, mode, status, version, stars, bpm, length_secs,
                    note_size, approach, accuracy, drain,
                    count_taps, count_holds, count_spins
             FROM charts WHERE set_id = ? ORDER BY mode, stars",
        )?;
        let charts = stmt
            .query_map(params![set_id as i64], Self::row_to_chart)?
            .collect::<Result<Vec<_>, _>>()?;
        set.charts = charts;

        Ok(Some(set))
    }

    fn row_to_set(row: &rusqlite::Row) -> rusqlite::Result<ChartSet> {
        let status_code: i64 = row.get(8)?;
        let time_submitted: Option<String> = row.get(9)?;
        let time_ranked: Option<String> = row.get(10)?;

        Ok(ChartSet {
            id: row.get::<_, i64>(0)? as u64,
            title: row.get(1)?,
            artist: row.get(2)?,
            creator: row.get(3)?,
            source: row.get(4)?,
            language: row.get(5)?,
            genre: row.get(6)?,
            tags: row.get(7)?,
            status: SetStatus::from_code(status_code).unwrap_or(SetStatus::Pending),
            time_submitted: time_submitted.as_deref().and_then(parse_ts),
            time_ranked: time_ranked.as_deref().and_then(parse_ts),
            download_disabled: row.get::<_, i64>(11)? != 0,
            nsfw: row.get::<_, i64>(12)? != 0,
            has_alt_media: row.get::<_, i64>(13)? != 0,
            stripped: variant_from_row(row, 14)?,
            alt_variant: variant_from_row(row, 17)?,
            charts: Vec::new(),
        })
    }

    fn row_to_chart(row: &rusqlite::Row) -> rusqlite::Result<Chart> {
        let mode_code: i64 = row.get(2)?;
        let status_code: i64 = row.get(3)?;
        Ok(Chart {
            id: row.get::<_, i64>(0)? as u64,
            set_id: row.get::<_, i64>(1)? as u64,
            mode: PlayMode::from_code(mode_code).unwrap_or(PlayMode::Standard),
            status: SetStatus::from_code(status_code).unwrap_or(SetStatus::Pending),
            version: row.get(4)?,
            stars: row.get(5)?,
            bpm: row.get(6)?,
            length_secs: row.get(7)?,
            note_size: row.get(8)?,
            approach: row.get(9)?,
            accuracy: row.get(10)?,
            drain: row.get(11)?,
            count_taps: row.get::<_, i64>(12)? as u32,
            count_holds: row.get::<_, i64>(13)? as u32,
            count_spins: row.get::<_, i64>(14)? as u32,
        })
    }
}

fn variant_from_row(
    row: &rusqlite::Row,
    base: usize,
) -> rusqlite::Result<Option<VariantDescriptor>> {
    let key: Option<String> = row.get(base)?;
    let Some(key) = key else {
        return Ok(None);
    };
    let size: Option<i64> = row.get(base + 1)?;
    let hash: Option<String> = row.get(base + 2)?;
    Ok(Some(VariantDescriptor {
        key,
        size_bytes: size.unwrap_or(0) as u64,
        sha256: hash.unwrap_or_default(),
    }))
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{chart, chart_set};

    fn catalog_with(sets: &[ChartSet]) -> SqliteCatalog {
        let catalog = SqliteCatalog::in_memory().unwrap();
        for set in sets {
            catalog.replace_set(set).unwrap();
        }
        catalog
    }

    fn index_rows(catalog: &SqliteCatalog, set_id: u64) -> i64 {
        let conn = catalog.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM chart_search WHERE set_id = ?",
            params![set_id as i64],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_replace_set_round_trip() {
        let set = chart_set(100, "Voyager", "Apogee", &[chart(1000, 100, 4.2)]);
        let catalog = catalog_with(&[set.clone()]);

        let loaded = catalog.get_set(100).unwrap().unwrap();
        assert_eq!(loaded.title, "Voyager");
        assert_eq!(loaded.status, set.status);
        assert_eq!(loaded.charts.len(), 1);
        assert_eq!(loaded.charts[0].id, 1000);
        assert_eq!(loaded.time_ranked, set.time_ranked);
    }

    #[test]
    fn test_import_idempotency() {
        let set = chart_set(
            100,
            "Voyager",
            "Apogee",
            &[chart(1000, 100, 4.2), chart(1001, 100, 5.6)],
        );
        let catalog = catalog_with(&[set.clone(), set.clone()]);

        assert_eq!(catalog.count_sets().unwrap(), 1);
        assert_eq!(catalog.count_charts().unwrap(), 2);
        assert_eq!(index_rows(&catalog, 100), 2);
    }

    #[test]
    fn test_index_rows_follow_chart_rows() {
        let mut set = chart_set(
            100,
            "Voyager",
            "Apogee",
            &[chart(1000, 100, 4.2), chart(1001, 100, 5.6)],
        );
        let catalog = catalog_with(&[set.clone()]);

        // Re-import with one chart removed; its index row must go too.
        set.charts.truncate(1);
        catalog.replace_set(&set).unwrap();
        assert_eq!(catalog.count_charts().unwrap(), 1);
        assert_eq!(index_rows(&catalog, 100), 1);
    }

    #[test]
    fn test_get_sets_preserves_order_and_skips_missing() {
        let catalog = catalog_with(&[
            chart_set(1, "A", "a", &[chart(10, 1, 1.0)]),
            chart_set(2, "B", "b", &[chart(20, 2, 2.0)]),
        ]);
        let sets = catalog.get_sets(&[2, 99, 1]).unwrap();
        let ids: Vec<u64> = sets.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_search_by_text() {
        let catalog = catalog_with(&[
            chart_set(1, "Ocean Drive", "Miami", &[chart(10, 1, 3.0)]),
            chart_set(2, "Desert Storm", "Cairo", &[chart(20, 2, 4.0)]),
        ]);

        let results = catalog.search("ocean", SortKey::Auto, 100, 0).unwrap();
        assert_eq!(results.total_sets, 1);
        assert_eq!(results.sets[0].id, 1);
    }

    #[test]
    fn test_search_numeric_widening_applies() {
        let catalog = catalog_with(&[
            chart_set(1, "A", "a", &[chart(10, 1, 5.32)]),
            chart_set(2, "B", "b", &[chart(20, 2, 6.1)]),
        ]);

        let results = catalog.search("stars=5", SortKey::Auto, 100, 0).unwrap();
        assert_eq!(results.total_sets, 1);
        assert_eq!(results.sets[0].id, 1);

        // 5.3 matches [5.30, 5.39]
        let results = catalog.search("stars=5.3", SortKey::Auto, 100, 0).unwrap();
        assert_eq!(results.total_sets, 1);
    }

    #[test]
    fn test_search_year_filter() {
        let mut old = chart_set(1, "Old", "a", &[chart(10, 1, 3.0)]);
        old.time_ranked = parse_ts("2019-05-01T00:00:00Z");
        let mut new = chart_set(2, "New", "b", &[chart(20, 2, 3.0)]);
        new.time_ranked = parse_ts("2023-05-01T00:00:00Z");
        let catalog = catalog_with(&[old, new]);

        let ids = catalog.search_ids("year=2023").unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_search_any_chart_qualifies_the_set() {
        // One chart passes the filter, so the whole set is returned once.
        let catalog = catalog_with(&[chart_set(
            1,
            "Mixed",
            "a",
            &[chart(10, 1, 2.0), chart(11, 1, 6.0)],
        )]);
        let results = catalog.search("stars>5", SortKey::Auto, 100, 0).unwrap();
        assert_eq!(results.total_sets, 1);
        assert_eq!(results.sets.len(), 1);
    }

    #[test]
    fn test_search_pagination() {
        let sets: Vec<ChartSet> = (1..=5)
            .map(|i| chart_set(i, &format!("Set {i}"), "a", &[chart(i * 10, i, 3.0)]))
            .collect();
        let catalog = catalog_with(&sets);

        let page = catalog.search("", SortKey::RankedAsc, 2, 2).unwrap();
        assert_eq!(page.total_sets, 5);
        assert_eq!(page.sets.len(), 2);
    }

    #[test]
    fn test_aggregate_sizes_deduplicate_sets() {
        let mut set = chart_set(1, "A", "a", &[chart(10, 1, 3.0), chart(11, 1, 4.0)]);
        set.stripped = Some(VariantDescriptor {
            key: "sets/v1/1.zip".into(),
            size_bytes: 1000,
            sha256: "aa".into(),
        });
        set.has_alt_media = true;
        set.alt_variant = Some(VariantDescriptor {
            key: "sets/v1/1-full.zip".into(),
            size_bytes: 2500,
            sha256: "bb".into(),
        });
        let catalog = catalog_with(&[set]);

        let totals = catalog.search_aggregate_sizes("").unwrap();
        assert_eq!(totals.set_count, 1);
        assert_eq!(totals.size_stripped, 1000);
        assert_eq!(totals.size_full, 2500);
    }

    #[test]
    fn test_sum_variant_sizes_slices() {
        let mut sets = Vec::new();
        for i in 1..=3u64 {
            let mut set = chart_set(i, "S", "a", &[chart(i * 10, i, 3.0)]);
            set.stripped = Some(VariantDescriptor {
                key: format!("sets/v1/{i}.zip"),
                size_bytes: 100 * i,
                sha256: "cc".into(),
            });
            sets.push(set);
        }
        let catalog = catalog_with(&sets);

        let (stripped, full) = catalog.sum_variant_sizes(&[1, 2, 3]).unwrap();
        assert_eq!(stripped, 600);
        assert_eq!(full, 600);
    }

    #[test]
    fn test_meta_round_trip() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        assert!(catalog.read_meta("dump_watermark").unwrap().is_none());
        catalog.write_meta("dump_watermark", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            catalog.read_meta("dump_watermark").unwrap().as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_set_ids_ranked_since() {
        let mut old = chart_set(1, "Old", "a", &[chart(10, 1, 3.0)]);
        old.time_ranked = parse_ts("2020-01-01T00:00:00Z");
        let mut new = chart_set(2, "New", "b", &[chart(20, 2, 3.0)]);
        new.time_ranked = parse_ts("2024-01-01T00:00:00Z");
        let catalog = catalog_with(&[old, new]);

        let all = catalog.set_ids_ranked_since(DateTime::UNIX_EPOCH).unwrap();
        assert_eq!(all, vec![1, 2]);

        let cutoff = parse_ts("2023-01-01T00:00:00Z").unwrap();
        let recent = catalog.set_ids_ranked_since(cutoff).unwrap();
        assert_eq!(recent, vec![2]);
    }

    #[test]
    fn test_optimize_search_index() {
        let catalog = catalog_with(&[chart_set(1, "A", "a", &[chart(10, 1, 3.0)])]);
        catalog.optimize_search_index().unwrap();
    }
}

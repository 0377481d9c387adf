//! Content-addressed pack storage with reference-counted GC.
//!
//! Membership lists are canonicalized, hashed and stored once per distinct
//! ID set. Repointing or deleting a pack garbage-collects the old entry in
//! the same transaction as the reference-count check, so concurrent edits
//! can never observe a pack pointing at a deleted entry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Pack, PackError, PackInit, PackKind, PackView};
use crate::catalog::SqliteCatalog;
use crate::metrics;

/// Membership rows inserted per statement when expanding an entry.
const MEMBER_SLICE: usize = 500;

/// Store for named packs on top of the catalog database.
pub struct PackStore {
    catalog: Arc<SqliteCatalog>,
}

impl PackStore {
    pub fn new(catalog: Arc<SqliteCatalog>) -> Self {
        Self { catalog }
    }

    /// Create a pack. Static packs get a content entry (reused when an
    /// identical ID set already has one); query packs store the filter
    /// string and resolve membership live.
    pub fn create_pack(
        &self,
        name: &str,
        kind: PackKind,
        creator: Option<&str>,
        init: PackInit,
    ) -> Result<Pack, PackError> {
        let pack_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let mut conn = self.catalog.lock_conn();
        let tx = conn.transaction()?;

        let (contents_hash, query) = match (kind, init) {
            (PackKind::Static, PackInit::Ids(ids)) => {
                let hash = ensure_contents_entry(&tx, &ids)?;
                (Some(hash), None)
            }
            (PackKind::Query, PackInit::Query(query)) => (None, Some(query)),
            _ => {
                return Err(PackError::Invalid(
                    "Static packs take an ID list, query packs take a filter string".to_string(),
                ))
            }
        };

        tx.execute(
            "INSERT INTO packs (id, name, kind, creator, contents_hash, query, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                pack_id,
                name,
                kind.as_str(),
                creator,
                contents_hash,
                query,
                format_ts(created_at),
            ],
        )?;
        tx.commit()?;

        info!("Created {} pack '{}' ({})", kind.as_str(), name, pack_id);
        Ok(Pack {
            id: pack_id,
            name: name.to_string(),
            kind,
            creator: creator.map(str::to_string),
            contents_hash,
            query,
            created_at,
        })
    }

    /// Edit a static pack's membership through a callback that receives the
    /// current ID list and returns the edited one. Creates or reuses the
    /// new content entry, repoints the pack, and garbage-collects the old
    /// entry when nothing references it anymore.
    pub fn edit_pack_contents<F>(&self, pack_id: &str, edit: F) -> Result<Pack, PackError>
    where
        F: FnOnce(Vec<u64>) -> Vec<u64>,
    {
        let mut conn = self.catalog.lock_conn();
        let tx = conn.transaction()?;

        let mut pack =
            load_pack_row(&tx, pack_id)?.ok_or_else(|| PackError::NotFound(pack_id.to_string()))?;
        if pack.kind != PackKind::Static {
            return Err(PackError::Invalid(
                "Query pack membership is resolved live and cannot be edited".to_string(),
            ));
        }

        let current = match &pack.contents_hash {
            Some(hash) => load_entry_ids(&tx, hash)?,
            None => Vec::new(),
        };
        let edited = edit(current);
        let new_hash = ensure_contents_entry(&tx, &edited)?;

        if pack.contents_hash.as_deref() != Some(new_hash.as_str()) {
            tx.execute(
                "UPDATE packs SET contents_hash = ? WHERE id = ?",
                params![new_hash, pack_id],
            )?;
            if let Some(old_hash) = pack.contents_hash.take() {
                gc_contents_entry(&tx, &old_hash)?;
            }
            pack.contents_hash = Some(new_hash);
        }

        tx.commit()?;
        Ok(pack)
    }

    /// Add set IDs to a static pack.
    pub fn add_to_pack(&self, pack_id: &str, set_ids: &[u64]) -> Result<Pack, PackError> {
        self.edit_pack_contents(pack_id, |mut current| {
            current.extend_from_slice(set_ids);
            current
        })
    }

    /// Remove set IDs from a static pack.
    pub fn remove_from_pack(&self, pack_id: &str, set_ids: &[u64]) -> Result<Pack, PackError> {
        self.edit_pack_contents(pack_id, |current| {
            current
                .into_iter()
                .filter(|id| !set_ids.contains(id))
                .collect()
        })
    }

    /// Add every result of a search query to a static pack.
    pub fn add_query_to_pack(&self, pack_id: &str, query: &str) -> Result<Pack, PackError> {
        let ids = self.catalog.search_ids(query)?;
        self.add_to_pack(pack_id, &ids)
    }

    /// Fetch a pack with its resolved membership. Static packs read their
    /// cached content entry; query packs resolve the stored filter against
    /// the current catalog on every read.
    pub fn get_pack(&self, pack_id: &str) -> Result<PackView, PackError> {
        let pack = {
            let conn = self.catalog.lock_conn();
            load_pack_row(&conn, pack_id)?
        }
        .ok_or_else(|| PackError::NotFound(pack_id.to_string()))?;

        match pack.kind {
            PackKind::Static => {
                let conn = self.catalog.lock_conn();
                let (set_ids, size_stripped, size_full) = match &pack.contents_hash {
                    Some(hash) => load_entry(&conn, hash)?,
                    None => (Vec::new(), 0, 0),
                };
                let set_count = set_ids.len() as u64;
                Ok(PackView {
                    pack,
                    set_ids,
                    set_count,
                    size_stripped,
                    size_full,
                })
            }
            PackKind::Query => {
                let query = pack.query.clone().unwrap_or_default();
                let set_ids = self.catalog.search_ids(&query)?;
                let totals = self.catalog.search_aggregate_sizes(&query)?;
                Ok(PackView {
                    pack,
                    set_count: set_ids.len() as u64,
                    set_ids,
                    size_stripped: totals.size_stripped,
                    size_full: totals.size_full,
                })
            }
        }
    }

    /// Delete a pack and garbage-collect its content entry if it was the
    /// last reference.
    pub fn delete_pack(&self, pack_id: &str) -> Result<(), PackError> {
        let mut conn = self.catalog.lock_conn();
        let tx = conn.transaction()?;

        let pack =
            load_pack_row(&tx, pack_id)?.ok_or_else(|| PackError::NotFound(pack_id.to_string()))?;
        tx.execute("DELETE FROM packs WHERE id = ?", params![pack_id])?;
        if let Some(hash) = &pack.contents_hash {
            gc_contents_entry(&tx, hash)?;
        }

        tx.commit()?;
        info!("Deleted pack '{}' ({})", pack.name, pack_id);
        Ok(())
    }

    /// All packs, newest first.
    pub fn list_packs(&self) -> Result<Vec<Pack>, PackError> {
        let conn = self.catalog.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, kind, creator, contents_hash, query, created_at
             FROM packs ORDER BY created_at DESC",
        )?;
        let packs = stmt
            .query_map([], row_to_pack)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(packs)
    }
}

/// Canonical form of a membership list: deduplicated, sorted ascending.
pub fn canonicalize_ids(ids: &[u64]) -> Vec<u64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Content hash of a canonical ID list: SHA-256 over its deterministic
/// serialization, lowercase hex.
pub fn contents_hash(canonical_ids: &[u64]) -> String {
    let serialized = serde_json::to_string(canonical_ids).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create the content entry for an ID list if it does not already exist,
/// returning its hash. Aggregate sizes are computed once, in bounded
/// slices, and cached on the entry.
fn ensure_contents_entry(tx: &Transaction, ids: &[u64]) -> Result<String, PackError> {
    let canonical = canonicalize_ids(ids);
    let hash = contents_hash(&canonical);

    let exists = tx
        .query_row(
            "SELECT 1 FROM pack_contents WHERE hash = ?",
            params![hash],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if exists {
        debug!("Reusing pack contents entry {}", hash);
        return Ok(hash);
    }

    let (size_stripped, size_full) = SqliteCatalog::sum_variant_sizes_inner(tx, &canonical)
        .map_err(PackError::Catalog)?;

    tx.execute(
        "INSERT INTO pack_contents (hash, ids_json, set_count, size_stripped, size_full)
         VALUES (?, ?, ?, ?, ?)",
        params![
            hash,
            serde_json::to_string(&canonical).unwrap_or_default(),
            canonical.len() as i64,
            size_stripped as i64,
            size_full as i64,
        ],
    )?;
    for slice in canonical.chunks(MEMBER_SLICE) {
        for &set_id in slice {
            tx.execute(
                "INSERT OR IGNORE INTO pack_members (hash, set_id) VALUES (?, ?)",
                params![hash, set_id as i64],
            )?;
        }
    }

    Ok(hash)
}

/// Delete a content entry if no pack references it. Runs inside the same
/// transaction as the repoint or pack delete that orphaned it.
fn gc_contents_entry(tx: &Transaction, hash: &str) -> Result<bool, PackError> {
    let references: i64 = tx.query_row(
        "SELECT COUNT(*) FROM packs WHERE contents_hash = ?",
        params![hash],
        |row| row.get(0),
    )?;
    if references > 0 {
        return Ok(false);
    }

    tx.execute("DELETE FROM pack_members WHERE hash = ?", params![hash])?;
    tx.execute("DELETE FROM pack_contents WHERE hash = ?", params![hash])?;
    metrics::PACK_CONTENT_GC.inc();
    debug!("Garbage-collected pack contents entry {}", hash);
    Ok(true)
}

fn load_pack_row(conn: &Connection, pack_id: &str) -> Result<Option<Pack>, PackError> {
    let pack = conn
        .query_row(
            "SELECT id, name, kind, creator, contents_hash, query, created_at
             FROM packs WHERE id = ?",
            params![pack_id],
            row_to_pack,
        )
        .optional()?;
    Ok(pack)
}

fn row_to_pack(row: &rusqlite::Row) -> rusqlite::Result<Pack> {
    let kind_raw: String = row.get(2)?;
    let created_raw: String = row.get(6)?;
    Ok(Pack {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: PackKind::parse(&kind_raw).unwrap_or(PackKind::Static),
        creator: row.get(3)?,
        contents_hash: row.get(4)?,
        query: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn load_entry_ids(conn: &Connection, hash: &str) -> Result<Vec<u64>, PackError> {
    let ids_json: String = conn.query_row(
        "SELECT ids_json FROM pack_contents WHERE hash = ?",
        params![hash],
        |row| row.get(0),
    )?;
    Ok(serde_json::from_str(&ids_json).unwrap_or_default())
}

fn load_entry(conn: &Connection, hash: &str) -> Result<(Vec<u64>, u64, u64), PackError> {
    let (ids_json, size_stripped, size_full): (String, i64, i64) = conn.query_row(
        "SELECT ids_json, size_stripped, size_full FROM pack_contents WHERE hash = ?",
        params![hash],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let ids: Vec<u64> = serde_json::from_str(&ids_json).unwrap_or_default();
    Ok((ids, size_stripped as u64, size_full as u64))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariantDescriptor;
    use crate::testing::fixtures::{chart, chart_set};

    fn store_with_sets(ids: &[u64]) -> (PackStore, Arc<SqliteCatalog>) {
        let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
        for &id in ids {
            let mut set = chart_set(id, &format!("Set {id}"), "Artist", &[chart(id * 10, id, 4.0)]);
            set.stripped = Some(VariantDescriptor {
                key: format!("sets/v1/{id}.zip"),
                size_bytes: 100,
                sha256: "aa".to_string(),
            });
            catalog.replace_set(&set).unwrap();
        }
        (PackStore::new(Arc::clone(&catalog)), catalog)
    }

    fn entry_count(catalog: &SqliteCatalog) -> i64 {
        let conn = catalog.lock_conn();
        conn.query_row("SELECT COUNT(*) FROM pack_contents", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_contents_hash_determinism() {
        let a = contents_hash(&canonicalize_ids(&[5, 3, 3, 1]));
        let b = contents_hash(&canonicalize_ids(&[1, 3, 5]));
        assert_eq!(a, b);
        assert_eq!(canonicalize_ids(&[5, 3, 3, 1]).len(), 3);
    }

    #[test]
    fn test_create_static_pack() {
        let (store, catalog) = store_with_sets(&[1, 3, 5]);
        let pack = store
            .create_pack("mine", PackKind::Static, Some("alice"), PackInit::Ids(vec![5, 3, 3, 1]))
            .unwrap();

        assert!(pack.contents_hash.is_some());
        let view = store.get_pack(&pack.id).unwrap();
        assert_eq!(view.set_ids, vec![1, 3, 5]);
        assert_eq!(view.set_count, 3);
        assert_eq!(view.size_stripped, 300);
        assert_eq!(entry_count(&catalog), 1);
    }

    #[test]
    fn test_identical_membership_shares_entry() {
        let (store, catalog) = store_with_sets(&[1, 3, 5]);
        let a = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![5, 3, 3, 1]))
            .unwrap();
        let b = store
            .create_pack("b", PackKind::Static, None, PackInit::Ids(vec![1, 3, 5]))
            .unwrap();

        assert_eq!(a.contents_hash, b.contents_hash);
        assert_eq!(entry_count(&catalog), 1);
    }

    #[test]
    fn test_gc_on_delete() {
        let (store, catalog) = store_with_sets(&[1, 2]);
        let a = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![1, 2]))
            .unwrap();
        let b = store
            .create_pack("b", PackKind::Static, None, PackInit::Ids(vec![1, 2]))
            .unwrap();

        // Two packs share one entry; deleting one keeps it.
        store.delete_pack(&a.id).unwrap();
        assert_eq!(entry_count(&catalog), 1);

        // Deleting the last reference collects the entry.
        store.delete_pack(&b.id).unwrap();
        assert_eq!(entry_count(&catalog), 0);
    }

    #[test]
    fn test_edit_repoints_and_collects_old_entry() {
        let (store, catalog) = store_with_sets(&[1, 2, 3]);
        let pack = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![1, 2]))
            .unwrap();
        let old_hash = pack.contents_hash.clone().unwrap();

        let edited = store.add_to_pack(&pack.id, &[3]).unwrap();
        assert_ne!(edited.contents_hash.as_ref().unwrap(), &old_hash);
        // The old entry was orphaned and collected.
        assert_eq!(entry_count(&catalog), 1);

        let view = store.get_pack(&pack.id).unwrap();
        assert_eq!(view.set_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_from_pack() {
        let (store, _catalog) = store_with_sets(&[1, 2, 3]);
        let pack = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![1, 2, 3]))
            .unwrap();
        store.remove_from_pack(&pack.id, &[2]).unwrap();

        let view = store.get_pack(&pack.id).unwrap();
        assert_eq!(view.set_ids, vec![1, 3]);
    }

    #[test]
    fn test_noop_edit_keeps_entry() {
        let (store, catalog) = store_with_sets(&[1, 2]);
        let pack = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![1, 2]))
            .unwrap();
        let hash = pack.contents_hash.clone();

        let edited = store.edit_pack_contents(&pack.id, |ids| ids).unwrap();
        assert_eq!(edited.contents_hash, hash);
        assert_eq!(entry_count(&catalog), 1);
    }

    #[test]
    fn test_query_pack_resolves_live() {
        let (store, catalog) = store_with_sets(&[1, 2]);
        let pack = store
            .create_pack(
                "starry",
                PackKind::Query,
                None,
                PackInit::Query("stars=4".to_string()),
            )
            .unwrap();

        let view = store.get_pack(&pack.id).unwrap();
        assert_eq!(view.set_count, 2);
        // Query packs own no content entry.
        assert_eq!(entry_count(&catalog), 0);

        // New catalog rows show up on the next read without editing the pack.
        let mut set = chart_set(9, "Set 9", "Artist", &[chart(90, 9, 4.0)]);
        set.stripped = Some(VariantDescriptor {
            key: "sets/v1/9.zip".to_string(),
            size_bytes: 100,
            sha256: "aa".to_string(),
        });
        catalog.replace_set(&set).unwrap();
        let view = store.get_pack(&pack.id).unwrap();
        assert_eq!(view.set_count, 3);
    }

    #[test]
    fn test_editing_query_pack_rejected() {
        let (store, _catalog) = store_with_sets(&[1]);
        let pack = store
            .create_pack("q", PackKind::Query, None, PackInit::Query("stars=4".into()))
            .unwrap();
        let err = store.add_to_pack(&pack.id, &[1]).unwrap_err();
        assert!(matches!(err, PackError::Invalid(_)));
    }

    #[test]
    fn test_kind_and_init_must_agree() {
        let (store, _catalog) = store_with_sets(&[1]);
        let err = store
            .create_pack("bad", PackKind::Static, None, PackInit::Query("x".into()))
            .unwrap_err();
        assert!(matches!(err, PackError::Invalid(_)));
    }

    #[test]
    fn test_get_missing_pack() {
        let (store, _catalog) = store_with_sets(&[]);
        assert!(matches!(
            store.get_pack("nope"),
            Err(PackError::NotFound(_))
        ));
    }

    #[test]
    fn test_pack_filter_matches_members() {
        let (store, catalog) = store_with_sets(&[1, 2, 3]);
        let pack = store
            .create_pack("a", PackKind::Static, None, PackInit::Ids(vec![1, 3]))
            .unwrap();

        let ids = catalog.search_ids(&format!("pack={}", pack.id)).unwrap();
        let mut ids = ids;
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }
}

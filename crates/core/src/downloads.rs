//! Presigned download URLs for stored archive variants.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::catalog::{CatalogError, SqliteCatalog};
use crate::object_store::{ObjectStore, ObjectStoreError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// A presigned URL for a set's archive. `want_alt_media` selects the full
/// variant when one exists, falling back to the stripped variant otherwise.
/// Returns `None` when the set is unknown or not yet imported.
pub async fn presigned_set_url(
    catalog: &SqliteCatalog,
    store: &dyn ObjectStore,
    bucket: &str,
    set_id: u64,
    want_alt_media: bool,
    ttl: Duration,
) -> Result<Option<String>, DownloadError> {
    let Some(set) = catalog.get_set(set_id)? else {
        return Ok(None);
    };
    let Some(stripped) = set.stripped else {
        debug!("Set {} has no uploaded variants yet", set_id);
        return Ok(None);
    };

    let key = if want_alt_media {
        set.alt_variant.map(|v| v.key).unwrap_or(stripped.key)
    } else {
        stripped.key
    };

    let url = store.presigned_url(bucket, &key, ttl).await?;
    Ok(Some(url))
}

//! Named packs of set IDs with content-addressed, deduplicated storage.

mod store;
mod types;

pub use store::{canonicalize_ids, contents_hash, PackStore};
pub use types::{Pack, PackError, PackInit, PackKind, PackView};

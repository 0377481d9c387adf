//! The mirrored catalog: sets, charts and the full-text search index.

mod sqlite;
mod types;

pub use sqlite::SqliteCatalog;
pub use types::{
    CatalogError, CatalogStats, Chart, ChartSet, PlayMode, SearchResults, SetStatus, SizeTotals,
    VariantDescriptor,
};

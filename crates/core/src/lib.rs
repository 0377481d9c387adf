//! chartmirror core: ingestion, search and pack storage for a local mirror
//! of community chart sets.
//!
//! The pipeline: [`dump::DumpStreamParser`] and [`upstream::UpstreamClient`]
//! feed the [`importer::ImportOrchestrator`], which normalizes archives,
//! uploads variants to an [`object_store::ObjectStore`] and persists rows
//! plus the search index through [`catalog::SqliteCatalog`].
//! [`scanner::ChangeScanner`] re-imports drifted sets, [`query`] compiles
//! the user-facing filter language, and [`packs::PackStore`] maintains
//! content-addressed groupings of set IDs.

pub mod catalog;
pub mod config;
pub mod downloads;
pub mod dump;
pub mod importer;
pub mod metrics;
pub mod object_store;
pub mod packs;
pub mod query;
pub mod scanner;
pub mod testing;
pub mod upstream;

pub use catalog::{
    CatalogError, CatalogStats, Chart, ChartSet, PlayMode, SearchResults, SetStatus, SizeTotals,
    SqliteCatalog, VariantDescriptor,
};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use downloads::{presigned_set_url, DownloadError};
pub use dump::{DumpError, DumpRecord, DumpStreamParser, DumpValue};
pub use importer::{BatchReport, ImportConfig, ImportError, ImportOrchestrator};
pub use object_store::{FsObjectStore, ObjectStore, ObjectStoreError};
pub use packs::{Pack, PackError, PackInit, PackKind, PackStore, PackView};
pub use query::{CompiledQuery, SortKey};
pub use scanner::{ChangeScanner, ScanReport};
pub use upstream::{
    RateGovernor, RateGovernorConfig, RetryPolicy, UpstreamApi, UpstreamClient, UpstreamConfig,
    UpstreamError,
};

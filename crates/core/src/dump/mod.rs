//! Streaming parser for upstream bulk-export dumps.
//!
//! The upstream service publishes a periodic SQL-dump-style text export of
//! its own database (one file per table). [`DumpStreamParser`] consumes such
//! a file chunk by chunk and yields typed row records for a single table,
//! without ever buffering the whole stream.

mod parser;

pub use parser::{DumpRecord, DumpStreamParser, DumpValue};

use thiserror::Error;

/// Errors surfaced while consuming a dump stream.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The stream ended before a `CREATE TABLE` statement for the target
    /// table was seen. Without the column mapping no row can be trusted.
    #[error("Schema for table '{0}' not found in dump stream")]
    SchemaNotFound(String),

    /// A row's value count did not match the discovered column count.
    #[error("Malformed row in table '{table}': {values} values for {columns} columns")]
    MalformedRow {
        table: String,
        values: usize,
        columns: usize,
    },

    #[error("I/O error while reading dump: {0}")]
    Io(#[from] std::io::Error),
}

//! Pack types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;

/// How a pack's membership is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackKind {
    /// Fixed membership stored as a content-addressed entry.
    Static,
    /// A saved filter string resolved live against the catalog.
    Query,
}

impl PackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PackKind::Static => "static",
            PackKind::Query => "query",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "static" => Some(PackKind::Static),
            "query" => Some(PackKind::Query),
            _ => None,
        }
    }
}

/// Initial membership for a new pack.
#[derive(Debug, Clone)]
pub enum PackInit {
    Ids(Vec<u64>),
    Query(String),
}

/// A named pack.
#[derive(Debug, Clone, Serialize)]
pub struct Pack {
    pub id: String,
    pub name: String,
    pub kind: PackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Content entry reference; set for static packs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents_hash: Option<String>,
    /// Stored filter string; set for query packs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A pack with its resolved membership and aggregate sizes.
#[derive(Debug, Clone, Serialize)]
pub struct PackView {
    pub pack: Pack,
    pub set_ids: Vec<u64>,
    pub set_count: u64,
    pub size_stripped: u64,
    pub size_full: u64,
}

/// Errors for pack operations.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("Pack not found: {0}")]
    NotFound(String),

    #[error("Invalid pack operation: {0}")]
    Invalid(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<rusqlite::Error> for PackError {
    fn from(e: rusqlite::Error) -> Self {
        PackError::Catalog(e.into())
    }
}

//! Authenticated client for the upstream catalog API.
//!
//! The upstream enforces a global request budget; [`RateGovernor`] keeps the
//! observed request rate inside that budget even when the server's
//! rate-limit headers are absent or stale, and [`retry`] provides bounded
//! exponential backoff for transient failures.

mod client;
mod governor;
mod retry;
mod types;

pub use client::{UpstreamClient, UpstreamConfig};
pub use governor::{Clock, RateGovernor, RateGovernorConfig, SystemClock};
pub use retry::{retry, RetryPolicy};
pub use types::{
    map_upstream_chart, map_upstream_set, RecentPage, UpstreamApi, UpstreamAvailability,
    UpstreamChart, UpstreamSet,
};

use thiserror::Error;

/// Errors from upstream interactions.
///
/// Network failures, rate limiting and server errors are retryable; other
/// client errors are permanent and surface to the import orchestrator as
/// per-item failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Upstream server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Upstream client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Failed to obtain access token: {0}")]
    Token(String),

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether a request that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Network(_) | UpstreamError::RateLimited | UpstreamError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Network(e.to_string())
    }
}

//! HTTP client for the upstream catalog API.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::governor::{RateGovernor, RateGovernorConfig};
use super::retry::{retry, RetryPolicy};
use super::types::{RecentPage, UpstreamApi, UpstreamSet};
use super::UpstreamError;
use crate::metrics;

/// Upstream API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// API base URL, e.g. "https://charts.example.com/api/v2".
    pub base_url: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// Client credentials.
    pub client_id: String,
    pub client_secret: String,
    /// Request timeout in seconds (default: 15).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate: RateGovernorConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_timeout_secs() -> u64 {
    15
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Authenticated upstream client with adaptive rate governance.
///
/// Every metadata request passes through the [`RateGovernor`]; download
/// endpoints carry their own independent limit and bypass it.
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    governor: RateGovernor,
    token: Mutex<Option<CachedToken>>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let governor = RateGovernor::new(config.rate.clone());
        Ok(Self {
            http,
            config,
            governor,
            token: Mutex::new(None),
        })
    }

    /// Return a valid bearer token, refreshing it when it is within a
    /// minute of expiry. The refresh runs under the token lock, so
    /// concurrent callers coalesce into a single outstanding credential
    /// request.
    async fn token(&self) -> Result<String, UpstreamError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Refreshing upstream access token");
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Token(format!("HTTP {status}: {body}")));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Token(e.to_string()))?;

        // Refresh proactively: treat the token as expired a minute early.
        let expires_at = Instant::now() + Duration::from_secs(data.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: data.access_token.clone(),
            expires_at,
        });

        Ok(data.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        retry(&self.config.retry, UpstreamError::is_retryable, || {
            self.get_json_once(path, query)
        })
        .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let token = self.token().await?;
        self.governor.acquire().await;

        let url = format!("{}{}", self.config.base_url, path);
        let result = self.http.get(&url).bearer_auth(&token).query(query).send().await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.governor.reconcile(None).await;
                metrics::UPSTREAM_REQUESTS.with_label_values(&["network_error"]).inc();
                return Err(e.into());
            }
        };

        let reported = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        if reported.is_none() {
            warn!("Missing X-RateLimit-Remaining header on GET {}", path);
        }
        self.governor.reconcile(reported).await;

        let status = response.status();
        if status.as_u16() == 429 {
            metrics::UPSTREAM_REQUESTS.with_label_values(&["rate_limited"]).inc();
            return Err(UpstreamError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            metrics::UPSTREAM_REQUESTS.with_label_values(&["server_error"]).inc();
            return Err(UpstreamError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::UPSTREAM_REQUESTS.with_label_values(&["client_error"]).inc();
            return Err(UpstreamError::Client {
                status: status.as_u16(),
                body,
            });
        }

        metrics::UPSTREAM_REQUESTS.with_label_values(&["ok"]).inc();
        response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Stream one GET response body to `dest`, removing the partial file on
    /// failure.
    async fn download_to(&self, path: &str, dest: &Path) -> Result<(), UpstreamError> {
        let token = self.token().await?;
        let url = format!("{}{}", self.config.base_url, path);
        let response = self.http.get(&url).bearer_auth(&token).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(UpstreamError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Client {
                status: status.as_u16(),
                body,
            });
        }

        let write_result: Result<(), UpstreamError> = async {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| UpstreamError::Network(e.to_string()))?;
            }
            file.flush()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
            Ok(())
        }
        .await;

        if write_result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        write_result
    }
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    async fn fetch_set(&self, set_id: u64) -> Result<UpstreamSet, UpstreamError> {
        self.get_json(&format!("/sets/{set_id}"), &[]).await
    }

    async fn recent_ranked(&self, cursor: Option<&str>) -> Result<RecentPage, UpstreamError> {
        let mut query = vec![("sort", "ranked_desc".to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get_json("/sets/recent", &query).await
    }

    async fn download_archive(&self, set_id: u64, dest: &Path) -> Result<(), UpstreamError> {
        self.download_to(&format!("/sets/{set_id}/download"), dest)
            .await
    }

    async fn download_chart_file(&self, chart_id: u64, dest: &Path) -> Result<(), UpstreamError> {
        self.download_to(&format!("/charts/{chart_id}/raw"), dest)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let toml = r#"
base_url = "https://charts.example.com/api/v2"
token_url = "https://charts.example.com/oauth/token"
client_id = "abc"
client_secret = "def"
"#;
        let config: UpstreamConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.rate.safety_floor, 200.0);
        assert_eq!(config.retry.max_attempts, 10);
    }
}

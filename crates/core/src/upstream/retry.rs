//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry tuning for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Cap applied to the growing delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the current delay added as random jitter.
    #[serde(default = "default_jitter_frac")]
    pub jitter_frac: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_frac() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_frac: default_jitter_frac(),
        }
    }
}

impl RetryPolicy {
    /// A zero-delay policy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_frac: 0.0,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// exhausted. The delay doubles after each retryable failure, with
/// proportional random jitter, capped at `max_delay_ms`.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut wait = Duration::from_millis(policy.initial_delay_ms);
    let cap = Duration::from_millis(policy.max_delay_ms);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < policy.max_attempts => {
                warn!(
                    "Retryable failure (attempt {}/{}), waiting {:?}: {}",
                    attempt, policy.max_attempts, wait, e
                );
                tokio::time::sleep(wait).await;
                let jitter = wait.mul_f64(policy.jitter_frac * rand::random::<f64>());
                wait = (wait * 2 + jitter).min(cap);
            }
            Err(e) => return Err(e),
        }
    }
}

//! Client-side rate governance for the upstream request budget.
//!
//! The upstream grants a fixed budget of requests that refills at a known
//! rate. The governor keeps a local remaining-budget estimate using a
//! linear-refill model, reconciled against the server's reported value
//! whenever a response carries one. Time is injected through [`Clock`] so
//! throttling behavior is deterministic under test.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics;

/// Source of time for the governor.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Governor tuning. Defaults mirror the upstream's published budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGovernorConfig {
    /// Maximum request budget the upstream grants.
    #[serde(default = "default_max_budget")]
    pub max_budget: f64,
    /// Budget refill rate in requests per second.
    #[serde(default = "default_max_per_second")]
    pub max_per_second: f64,
    /// The estimate is never allowed to fall under this floor; requests
    /// sleep until the refill brings it back up.
    #[serde(default = "default_safety_floor")]
    pub safety_floor: f64,
}

fn default_max_budget() -> f64 {
    1200.0
}

fn default_max_per_second() -> f64 {
    20.0
}

fn default_safety_floor() -> f64 {
    200.0
}

impl Default for RateGovernorConfig {
    fn default() -> Self {
        Self {
            max_budget: default_max_budget(),
            max_per_second: default_max_per_second(),
            safety_floor: default_safety_floor(),
        }
    }
}

struct GovernorState {
    remaining: f64,
    last_request: Option<Instant>,
}

/// Shared rate governor. Concurrent callers serialize on the internal lock
/// so each request pessimistically pre-pays before the next one is allowed
/// to proceed; the collective request rate therefore cannot overrun the
/// upstream's real limit.
pub struct RateGovernor<C: Clock = SystemClock> {
    config: RateGovernorConfig,
    state: Mutex<GovernorState>,
    clock: C,
}

impl RateGovernor<SystemClock> {
    pub fn new(config: RateGovernorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateGovernor<C> {
    pub fn with_clock(config: RateGovernorConfig, clock: C) -> Self {
        let state = GovernorState {
            remaining: config.max_budget,
            last_request: None,
        };
        Self {
            config,
            state: Mutex::new(state),
            clock,
        }
    }

    /// Wait until the budget allows another request, then pre-deduct the
    /// safety floor from the estimate. The deduction is reconciled once the
    /// response's rate-limit header is seen.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        let mut remaining = self.current_remaining(&state);
        if remaining < self.config.safety_floor {
            let deficit = self.config.safety_floor - remaining;
            let wait = Duration::from_secs_f64(deficit / self.config.max_per_second);
            debug!("Rate budget at {:.0}, throttling for {:?}", remaining, wait);
            metrics::UPSTREAM_THROTTLE_SLEEPS.inc();
            self.clock.sleep(wait).await;
            remaining = self.config.safety_floor;
        }

        state.remaining = (remaining - self.config.safety_floor).max(0.0);
    }

    /// Fold the server-reported remaining budget back into the estimate.
    /// The header value wins when present; either way the refill clock
    /// restarts from now.
    pub async fn reconcile(&self, reported_remaining: Option<f64>) {
        let mut state = self.state.lock().await;
        if let Some(remaining) = reported_remaining {
            state.remaining = remaining.clamp(0.0, self.config.max_budget);
        }
        state.last_request = Some(self.clock.now());
    }

    /// The current linear-refill estimate, for diagnostics and tests.
    pub async fn estimate(&self) -> f64 {
        let state = self.state.lock().await;
        self.current_remaining(&state)
    }

    fn current_remaining(&self, state: &GovernorState) -> f64 {
        let refilled = match state.last_request {
            Some(last) => {
                let elapsed = self.clock.now().saturating_duration_since(last);
                state.remaining + elapsed.as_secs_f64() * self.config.max_per_second
            }
            None => state.remaining,
        };
        refilled.min(self.config.max_budget).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Deterministic clock whose time only advances when slept on.
    struct ManualClock {
        now: StdMutex<Instant>,
        slept: StdMutex<Vec<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: StdMutex::new(Instant::now()),
                slept: StdMutex::new(Vec::new()),
            }
        }

        fn advance(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += d;
        }

        fn total_slept(&self) -> Duration {
            self.slept.lock().unwrap().iter().sum()
        }
    }

    #[async_trait]
    impl Clock for &ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }

    fn test_config() -> RateGovernorConfig {
        RateGovernorConfig {
            max_budget: 1200.0,
            max_per_second: 20.0,
            safety_floor: 200.0,
        }
    }

    #[tokio::test]
    async fn test_estimate_never_negative_and_floor_enforced() {
        let clock = ManualClock::new();
        let governor = RateGovernor::with_clock(test_config(), &clock);

        // Drain the budget with back-to-back requests and no header
        // reconciliation; elapsed time stays at zero.
        for _ in 0..20 {
            governor.acquire().await;
            governor.reconcile(None).await;
            assert!(governor.estimate().await >= 0.0);
        }

        // Each acquire pre-deducts the floor, so sleeps must have kicked in
        // once the estimate bottomed out.
        assert!(clock.total_slept() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_refill_is_linear_and_capped() {
        let clock = ManualClock::new();
        let governor = RateGovernor::with_clock(test_config(), &clock);

        governor.acquire().await;
        governor.reconcile(Some(400.0)).await;
        assert!((governor.estimate().await - 400.0).abs() < 1.0);

        // 10 seconds at 20 req/s refills 200.
        clock.advance(Duration::from_secs(10));
        assert!((governor.estimate().await - 600.0).abs() < 1.0);

        // Refill never exceeds the maximum budget.
        clock.advance(Duration::from_secs(3600));
        assert!((governor.estimate().await - 1200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_header_value_wins() {
        let clock = ManualClock::new();
        let governor = RateGovernor::with_clock(test_config(), &clock);

        governor.acquire().await;
        governor.reconcile(Some(37.0)).await;
        assert!((governor.estimate().await - 37.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_no_sleep_while_budget_healthy() {
        let clock = ManualClock::new();
        let governor = RateGovernor::with_clock(test_config(), &clock);

        governor.acquire().await;
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sleep_duration_covers_deficit() {
        let clock = ManualClock::new();
        let governor = RateGovernor::with_clock(test_config(), &clock);

        // Server says almost nothing is left.
        governor.acquire().await;
        governor.reconcile(Some(100.0)).await;

        governor.acquire().await;
        // Deficit of 100 at 20 req/s is 5 seconds.
        let slept = clock.total_slept();
        assert!(slept >= Duration::from_secs(5));
    }
}

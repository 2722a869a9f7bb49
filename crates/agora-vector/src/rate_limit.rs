//! Per-provider rate-limit and backoff bookkeeping.
//!
//! A [`RateLimiter`] owns one [`ProviderState`] per embedding provider. It is
//! an explicit service object injected into the
//! [`FailoverEmbedder`](crate::failover::FailoverEmbedder); nothing here is global. Every
//! admission check and every outcome report is one short critical section
//! on a single mutex. No lock is held across an await point.
//!
//! Time is read from [`tokio::time::Instant`] so tests can pause and
//! advance the clock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Limits applied to every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per fixed window.
    pub requests_per_window: u32,

    /// Window length.
    pub window: Duration,

    /// Backoff after the first counted failure; doubled per further failure.
    pub base_backoff: Duration,

    /// Upper bound for any backoff.
    pub max_backoff: Duration,

    /// Consecutive non-rate-limit failures before backoff kicks in.
    pub failure_threshold: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window: Duration::from_secs(60),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }
}

/// Mutable state tracked for one provider.
#[derive(Debug, Clone)]
pub struct ProviderState {
    /// Requests admitted in the current window.
    pub requests_in_window: u32,
    /// When the current window opened.
    pub window_start: Instant,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// The provider is skipped until this instant.
    pub backoff_until: Option<Instant>,
}

impl ProviderState {
    fn new(now: Instant) -> Self {
        Self {
            requests_in_window: 0,
            window_start: now,
            consecutive_failures: 0,
            backoff_until: None,
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.requests_in_window = 0;
        }
    }

    fn backoff_remaining(&self, now: Instant) -> Duration {
        self.backoff_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// Why a provider was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The provider is backing off after failures or a rate-limit response.
    Backoff(Duration),
    /// The provider's request window is exhausted.
    WindowExhausted(Duration),
}

/// Snapshot of one provider's limiter state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Requests admitted in the current window.
    pub requests_in_window: u32,
    /// Time until the current window resets.
    pub window_remaining: Duration,
    /// Time until the provider leaves backoff (zero when not backing off).
    pub backoff_remaining: Duration,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Whether the next call would be admitted.
    pub available: bool,
}

/// Per-provider rate-limit and backoff tracker.
#[derive(Debug, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    states: Mutex<HashMap<String, ProviderState>>,
}

impl RateLimiter {
    /// Create a limiter with the given policy.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// The policy in force.
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn with_state<T>(&self, provider: &str, f: impl FnOnce(&mut ProviderState, Instant) -> T) -> T {
        let now = Instant::now();
        // Counters stay consistent even if a holder panicked.
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = states
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(now));
        f(state, now)
    }

    /// Check and count one request for `provider`.
    ///
    /// On success the request is counted against the current window.
    pub fn try_acquire(&self, provider: &str) -> Result<(), Denial> {
        let policy = self.policy;
        self.with_state(provider, |state, now| {
            state.roll_window(now, policy.window);

            let backoff = state.backoff_remaining(now);
            if !backoff.is_zero() {
                return Err(Denial::Backoff(backoff));
            }
            state.backoff_until = None;

            if state.requests_in_window >= policy.requests_per_window {
                let reset = policy
                    .window
                    .saturating_sub(now.duration_since(state.window_start));
                return Err(Denial::WindowExhausted(reset));
            }
            state.requests_in_window += 1;
            Ok(())
        })
    }

    /// Record a successful call; clears failures and backoff.
    pub fn record_success(&self, provider: &str) {
        self.with_state(provider, |state, _| {
            state.consecutive_failures = 0;
            state.backoff_until = None;
        });
    }

    /// Record a rate-limit response. Backs off immediately.
    ///
    /// Returns the backoff applied.
    pub fn record_rate_limited(&self, provider: &str, retry_after: Option<Duration>) -> Duration {
        let policy = self.policy;
        self.with_state(provider, |state, now| {
            state.consecutive_failures += 1;
            let backoff = exponential(policy, state.consecutive_failures)
                .max(retry_after.unwrap_or_default())
                .min(policy.max_backoff);
            state.backoff_until = Some(now + backoff);
            backoff
        })
    }

    /// Record any other failure. Backs off once the failure threshold is hit.
    ///
    /// Returns the backoff applied, if any.
    pub fn record_failure(&self, provider: &str) -> Option<Duration> {
        let policy = self.policy;
        self.with_state(provider, |state, now| {
            state.consecutive_failures += 1;
            if state.consecutive_failures < policy.failure_threshold {
                return None;
            }
            let over = state.consecutive_failures - policy.failure_threshold + 1;
            let backoff = exponential(policy, over);
            state.backoff_until = Some(now + backoff);
            Some(backoff)
        })
    }

    /// Status for each named provider, in the given order.
    pub fn status<'a>(&self, providers: impl IntoIterator<Item = &'a str>) -> Vec<ProviderStatus> {
        let policy = self.policy;
        providers
            .into_iter()
            .map(|name| {
                self.with_state(name, |state, now| {
                    state.roll_window(now, policy.window);
                    let backoff_remaining = state.backoff_remaining(now);
                    ProviderStatus {
                        name: name.to_string(),
                        requests_in_window: state.requests_in_window,
                        window_remaining: policy
                            .window
                            .saturating_sub(now.duration_since(state.window_start)),
                        backoff_remaining,
                        consecutive_failures: state.consecutive_failures,
                        available: backoff_remaining.is_zero()
                            && state.requests_in_window < policy.requests_per_window,
                    }
                })
            })
            .collect()
    }
}

/// `base · 2^(n-1)`, capped.
fn exponential(policy: RateLimitPolicy, n: u32) -> Duration {
    let shift = n.saturating_sub(1).min(20);
    policy
        .base_backoff
        .saturating_mul(1u32 << shift)
        .min(policy.max_backoff)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_window: 2,
            window: Duration::from_secs(10),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            failure_threshold: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_exhaustion_and_reset() {
        let limiter = RateLimiter::new(policy());
        assert!(limiter.try_acquire("p").is_ok());
        assert!(limiter.try_acquire("p").is_ok());
        assert!(matches!(
            limiter.try_acquire("p"),
            Err(Denial::WindowExhausted(_))
        ));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire("p").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_below_threshold_do_not_back_off() {
        let limiter = RateLimiter::new(policy());
        assert_eq!(limiter.record_failure("p"), None);
        assert!(limiter.try_acquire("p").is_ok());
        assert_eq!(limiter.record_failure("p"), Some(Duration::from_secs(1)));
        assert!(matches!(limiter.try_acquire("p"), Err(Denial::Backoff(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let limiter = RateLimiter::new(policy());
        let applied: Vec<Duration> = (0..6).filter_map(|_| limiter.record_failure("p")).collect();
        assert_eq!(
            applied,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honors_retry_after() {
        let limiter = RateLimiter::new(policy());
        let applied = limiter.record_rate_limited("p", Some(Duration::from_secs(5)));
        assert_eq!(applied, Duration::from_secs(5));

        let status = limiter.status(["p"]);
        assert_eq!(status[0].backoff_remaining, Duration::from_secs(5));
        assert!(!status[0].available);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.try_acquire("p").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let limiter = RateLimiter::new(policy());
        limiter.record_failure("p");
        limiter.record_success("p");
        let status = limiter.status(["p"]);
        assert_eq!(status[0].consecutive_failures, 0);
        assert!(status[0].available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_window_remaining() {
        let limiter = RateLimiter::new(policy());
        limiter.try_acquire("p").unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        let status = limiter.status(["p", "q"]);
        assert_eq!(status[0].requests_in_window, 1);
        assert_eq!(status[0].window_remaining, Duration::from_secs(7));
        assert_eq!(status[1].name, "q");
        assert_eq!(status[1].requests_in_window, 0);
    }
}

//! The rate limit decision engine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::backend::memory::LocalMemoryBackend;
use crate::backend::redis::RedisBackend;
use crate::backend::{now_ms, CounterBackend, WindowCounter};
use crate::error::Result;
use crate::key::derive_key;
use crate::policy::RateLimitConfig;

/// The outcome of one rate limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the current window expires.
    pub reset_at_ms: u64,
    /// Whole seconds until the caller should retry; present only when
    /// denied, and never below 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Counts requests per (identifier, policy) and decides allow/deny.
///
/// The shared store is tried first on every call; any failure there is
/// absorbed by evaluating the same call against the in-process store
/// instead. There is no circuit breaker: the next call tries the shared
/// store again, so recovery is immediate once it is back.
pub struct RateLimiter {
    shared: Option<Arc<dyn CounterBackend>>,
    local: Arc<LocalMemoryBackend>,
}

impl RateLimiter {
    /// Build a limiter with an optional shared Redis store. Without a
    /// URL the limiter runs purely on the in-process store; that branch
    /// is distinct from the error-triggered fallback and never logs.
    pub fn new(redis_url: Option<&str>, op_timeout: Duration) -> Result<Self> {
        let shared: Option<Arc<dyn CounterBackend>> = match redis_url {
            Some(url) if !url.is_empty() => Some(Arc::new(RedisBackend::new(url, op_timeout)?)),
            _ => None,
        };
        Ok(Self {
            shared,
            local: Arc::new(LocalMemoryBackend::new()),
        })
    }

    pub fn local_only() -> Self {
        Self {
            shared: None,
            local: Arc::new(LocalMemoryBackend::new()),
        }
    }

    /// Build a limiter over an explicit shared backend.
    pub fn with_shared_backend(shared: Arc<dyn CounterBackend>) -> Self {
        Self {
            shared: Some(shared),
            local: Arc::new(LocalMemoryBackend::new()),
        }
    }

    /// Count one request for `identifier` against `config` and decide.
    ///
    /// Never fails. A shared-store error downgrades this single call to
    /// the in-process budget, which is weaker (per instance rather than
    /// global) but keeps the caller's request moving.
    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let key = derive_key(identifier, config);
        let window_ms = config.window_ms();

        let counter = match &self.shared {
            Some(shared) => match shared.increment_and_get(&key, window_ms).await {
                Ok(counter) => counter,
                Err(e) => {
                    warn!(key = %key, error = %e, "shared counter store unavailable, using local store");
                    self.local.increment(&key, window_ms)
                }
            },
            None => self.local.increment(&key, window_ms),
        };

        decide(config.limit, counter)
    }

    /// Drop expired local counters. Called by the background sweeper.
    pub fn sweep_expired(&self) -> usize {
        self.local.sweep_expired()
    }

    /// Number of live entries in the local store, for health reporting.
    pub fn local_entries(&self) -> usize {
        self.local.len()
    }

    pub fn shared_configured(&self) -> bool {
        self.shared.is_some()
    }

    /// Whether the shared store currently answers. False when none is
    /// configured.
    pub async fn shared_available(&self) -> bool {
        match &self.shared {
            Some(shared) => shared.ping().await.is_ok(),
            None => false,
        }
    }
}

fn decide(limit: u64, counter: WindowCounter) -> RateLimitDecision {
    let allowed = counter.count <= limit;
    let remaining = limit.saturating_sub(counter.count);
    let retry_after_secs = if allowed {
        None
    } else {
        let wait_ms = counter.reset_at_ms.saturating_sub(now_ms());
        Some(wait_ms.div_ceil(1000).max(1))
    };

    RateLimitDecision {
        allowed,
        limit,
        remaining,
        reset_at_ms: counter.reset_at_ms,
        retry_after_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;

    /// Shared backend that fails every call, standing in for an
    /// unreachable Redis.
    struct FailingBackend;

    #[async_trait]
    impl CounterBackend for FailingBackend {
        async fn increment_and_get(&self, _key: &str, _window_ms: u64) -> Result<WindowCounter> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<()> {
            Err(Error::BackendUnavailable("connection refused".into()))
        }
    }

    fn contact_policy() -> RateLimitConfig {
        RateLimitConfig::new("contact", 3, Duration::from_secs(60)).unwrap()
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::local_only();
        let config = contact_policy();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("ip-a", &config).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
            assert!(decision.retry_after_secs.is_none());
        }

        let denied = limiter.check("ip-a", &config).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        let retry = denied.retry_after_secs.unwrap();
        assert!((1..=60).contains(&retry), "retry_after was {retry}");
    }

    #[tokio::test]
    async fn identifiers_keep_separate_budgets() {
        let limiter = RateLimiter::local_only();
        let config = contact_policy();

        let a = limiter.check("ip-a", &config).await;
        let b = limiter.check("ip-b", &config).await;
        assert_eq!(a.remaining, 2);
        assert_eq!(b.remaining, 2);
    }

    #[tokio::test]
    async fn policies_keep_separate_budgets_for_one_identifier() {
        let limiter = RateLimiter::local_only();
        let contact = contact_policy();
        let fetch = RateLimitConfig::new("fetch", 10, Duration::from_secs(60)).unwrap();

        // Exhaust the contact budget.
        for _ in 0..4 {
            limiter.check("ip-a", &contact).await;
        }
        assert!(!limiter.check("ip-a", &contact).await.allowed);

        // The fetch budget for the same identifier is untouched.
        let decision = limiter.check("ip-a", &fetch).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
    }

    #[tokio::test]
    async fn shared_store_failure_falls_back_to_local() {
        let limiter = RateLimiter::with_shared_backend(Arc::new(FailingBackend));
        let config = contact_policy();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("ip-a", &config).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.check("ip-a", &config).await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.unwrap() >= 1);
    }

    #[tokio::test]
    async fn reset_is_stable_across_calls_in_one_window() {
        let limiter = RateLimiter::local_only();
        let config = contact_policy();

        let first = limiter.check("ip-a", &config).await;
        let second = limiter.check("ip-a", &config).await;
        assert_eq!(first.reset_at_ms, second.reset_at_ms);
    }

    #[tokio::test]
    async fn shared_availability_reflects_configuration() {
        let local = RateLimiter::local_only();
        assert!(!local.shared_configured());
        assert!(!local.shared_available().await);

        let failing = RateLimiter::with_shared_backend(Arc::new(FailingBackend));
        assert!(failing.shared_configured());
        assert!(!failing.shared_available().await);
    }

    #[test]
    fn denied_retry_after_never_drops_below_one() {
        // Window already at its boundary relative to now.
        let decision = decide(
            1,
            WindowCounter {
                count: 2,
                reset_at_ms: now_ms(),
            },
        );
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(1));
    }

    #[test]
    fn count_beyond_limit_clamps_remaining_to_zero() {
        let decision = decide(
            3,
            WindowCounter {
                count: 10,
                reset_at_ms: now_ms() + 60_000,
            },
        );
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }
}

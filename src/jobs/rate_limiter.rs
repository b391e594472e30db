//! Fixed-window rate limiting per resource key
//!
//! Counters live in a [`UsageStore`], so every dispatcher process sharing
//! the store also shares the limits.

use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;
use serde::Serialize;

use crate::config::RateLimitRule;
use crate::error::AppResult;
use crate::jobs::clock::{self, Clock};
use crate::store::UsageStore;

/// Current standing of one resource key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub resource_key: String,
    /// `None` when the key is unlimited
    pub limit: Option<u32>,
    pub used: u32,
    pub reset_at: Option<Timestamp>,
}

impl RateLimitStatus {
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    usage: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        rules: HashMap<String, RateLimitRule>,
        usage: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            usage,
            clock,
        }
    }

    pub fn rule(&self, resource_key: &str) -> Option<&RateLimitRule> {
        self.rules.get(resource_key)
    }

    /// Record `cost` units against `resource_key` if they fit in the current
    /// window. A denial leaves the counter untouched.
    pub async fn try_acquire(&self, resource_key: &str, cost: u32) -> AppResult<bool> {
        let Some(rule) = self.rules.get(resource_key) else {
            return Ok(true);
        };
        if cost > rule.max_requests {
            return Ok(false);
        }

        let now = self.clock.now();
        let window_start = clock::window_start(now, rule.window_seconds);
        let granted = self
            .usage
            .try_consume(resource_key, window_start, cost, rule.max_requests, now)
            .await?;

        if !granted {
            tracing::debug!(
                resource_key,
                cost,
                limit = rule.max_requests,
                window_seconds = rule.window_seconds,
                "Rate limit reached"
            );
        }
        Ok(granted)
    }

    pub async fn remaining(&self, resource_key: &str) -> AppResult<RateLimitStatus> {
        let Some(rule) = self.rules.get(resource_key) else {
            return Ok(RateLimitStatus {
                resource_key: resource_key.to_string(),
                limit: None,
                used: 0,
                reset_at: None,
            });
        };

        let window_start = clock::window_start(self.clock.now(), rule.window_seconds);
        let used = self.usage.usage(resource_key, window_start).await?;

        Ok(RateLimitStatus {
            resource_key: resource_key.to_string(),
            limit: Some(rule.max_requests),
            used,
            reset_at: Some(clock::window_end(window_start, rule.window_seconds)),
        })
    }

    /// Every configured key with its current usage, sorted by key
    pub async fn snapshot(&self) -> AppResult<Vec<RateLimitStatus>> {
        let mut keys: Vec<&String> = self.rules.keys().collect();
        keys.sort();

        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            statuses.push(self.remaining(key).await?);
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use std::time::Duration;

    fn limiter(max_requests: u32, window_seconds: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        let rules = HashMap::from([(
            "img".to_string(),
            RateLimitRule {
                max_requests,
                window_seconds,
            },
        )]);
        let limiter = RateLimiter::new(
            rules,
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_unconfigured_key_is_unlimited() {
        let (limiter, _) = limiter(1, 60);
        for _ in 0..100 {
            assert!(limiter.try_acquire("content", 1).await.unwrap());
        }
        let status = limiter.remaining("content").await.unwrap();
        assert_eq!(status.limit, None);
        assert_eq!(status.remaining(), None);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let (limiter, clock) = limiter(2, 60);
        assert!(limiter.try_acquire("img", 1).await.unwrap());
        assert!(limiter.try_acquire("img", 1).await.unwrap());
        assert!(!limiter.try_acquire("img", 1).await.unwrap());

        let status = limiter.remaining("img").await.unwrap();
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining(), Some(0));
        let reset_at = status.reset_at.unwrap();

        clock.set(reset_at);
        assert!(limiter.try_acquire("img", 1).await.unwrap());
        assert_eq!(limiter.remaining("img").await.unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_denied_cost_has_no_side_effects() {
        let (limiter, _) = limiter(3, 60);
        assert!(limiter.try_acquire("img", 2).await.unwrap());
        assert!(!limiter.try_acquire("img", 2).await.unwrap());
        assert!(!limiter.try_acquire("img", 4).await.unwrap());
        assert_eq!(limiter.remaining("img").await.unwrap().used, 2);
        assert!(limiter.try_acquire("img", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_lists_configured_keys() {
        let (limiter, clock) = limiter(5, 60);
        limiter.try_acquire("img", 1).await.unwrap();
        clock.advance(Duration::from_secs(1));

        let snapshot = limiter.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].resource_key, "img");
        assert_eq!(snapshot[0].remaining(), Some(4));
    }

    proptest! {
        #[test]
        fn prop_grants_never_exceed_limit(
            max_requests in 1u32..20,
            attempts in 1usize..60,
            cost in 1u32..4,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let granted = runtime.block_on(async {
                let (limiter, _) = limiter(max_requests, 60);
                let mut granted = 0u32;
                for _ in 0..attempts {
                    if limiter.try_acquire("img", cost).await.unwrap() {
                        granted += cost;
                    }
                }
                granted
            });
            prop_assert!(granted <= max_requests);
        }
    }
}

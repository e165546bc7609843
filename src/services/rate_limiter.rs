//! Sliding-window admission control keyed by identity and action class

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    PaymentInitiation,
    SupportTicket,
    Default,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::PaymentInitiation => "payment_initiation",
            ActionClass::SupportTicket => "support_ticket",
            ActionClass::Default => "default",
        }
    }

    pub fn default_rule(&self) -> RateLimitRule {
        let (max_requests, window_secs) = match self {
            ActionClass::PaymentInitiation => (5, 300),
            ActionClass::SupportTicket => (3, 600),
            ActionClass::Default => (10, 60),
        };
        RateLimitRule {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: usize,
    pub window: Duration,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Admits and records the call, or rejects it without recording.
    async fn is_allowed(&self, identity: &str, action: ActionClass) -> bool;

    /// Time until the oldest recorded call leaves the window; zero when nothing is recorded.
    async fn remaining_cooldown(&self, identity: &str, action: ActionClass) -> Duration;
}

type WindowMap = HashMap<(String, ActionClass), VecDeque<Instant>>;

/// Calls between sweeps of expired windows.
const SWEEP_EVERY: usize = 1024;

#[derive(Default)]
struct WindowTable {
    windows: WindowMap,
    calls_since_sweep: usize,
}

/// Per-process limiter. The table lock is never held across an await.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    rules: RateLimitConfig,
    table: Arc<Mutex<WindowTable>>,
}

impl InMemoryRateLimiter {
    pub fn new(rules: RateLimitConfig) -> Self {
        Self {
            rules,
            table: Arc::new(Mutex::new(WindowTable::default())),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, WindowTable> {
        // A panic while holding the guard leaves the deques consistent, so recover
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn check_at(&self, identity: &str, action: ActionClass, now: Instant) -> bool {
        let rule = self.rules.rule_for(action);
        let mut table = self.table();

        table.calls_since_sweep += 1;
        if table.calls_since_sweep >= SWEEP_EVERY {
            table.calls_since_sweep = 0;
            let rules = &self.rules;
            table.windows.retain(|(_, class), window| {
                let span = rules.rule_for(*class).window;
                window
                    .back()
                    .is_some_and(|newest| now.saturating_duration_since(*newest) < span)
            });
        }

        let key = (identity.to_string(), action);
        let window = table.windows.entry(key.clone()).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= rule.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < rule.max_requests {
            window.push_back(now);
            true
        } else {
            if window.is_empty() {
                table.windows.remove(&key);
            }
            false
        }
    }

    /// Identity/class pairs currently holding a window.
    pub(crate) fn tracked_windows(&self) -> usize {
        self.table().windows.len()
    }

    pub(crate) fn cooldown_at(&self, identity: &str, action: ActionClass, now: Instant) -> Duration {
        let rule = self.rules.rule_for(action);
        let table = self.table();
        table
            .windows
            .get(&(identity.to_string(), action))
            .and_then(|window| window.front())
            .map(|oldest| rule.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn is_allowed(&self, identity: &str, action: ActionClass) -> bool {
        let allowed = self.check_at(identity, action, Instant::now());
        if !allowed {
            warn!(identity = %identity, action = action.as_str(), "rate limit exceeded");
        }
        allowed
    }

    async fn remaining_cooldown(&self, identity: &str, action: ActionClass) -> Duration {
        self.cooldown_at(identity, action, Instant::now())
    }
}

#[cfg(feature = "cache")]
pub use redis_limiter::RedisRateLimiter;

#[cfg(feature = "cache")]
mod redis_limiter {
    use super::*;
    use crate::cache::keys::rate_limit::WindowKey;
    use crate::cache::{CacheResult, RedisPool};
    use chrono::Utc;
    use uuid::Uuid;

    // KEYS[1] window set; ARGV now_ms, window_ms, max_requests, member
    const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]) - tonumber(ARGV[2]))
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[3]) then
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

    // KEYS[1] window set; ARGV now_ms, window_ms. Returns remaining ms.
    const COOLDOWN_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]) - tonumber(ARGV[2]))
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if #oldest == 0 then
  return 0
end
local remaining = tonumber(oldest[2]) + tonumber(ARGV[2]) - tonumber(ARGV[1])
if remaining < 0 then
  return 0
end
return remaining
"#;

    /// Sorted-set limiter shared through Redis. Fails open on Redis errors.
    #[derive(Clone)]
    pub struct RedisRateLimiter {
        pool: RedisPool,
        rules: RateLimitConfig,
    }

    impl RedisRateLimiter {
        pub fn new(pool: RedisPool, rules: RateLimitConfig) -> Self {
            Self { pool, rules }
        }

        async fn admit(&self, key: &WindowKey, rule: RateLimitRule) -> CacheResult<bool> {
            let mut conn = self.pool.get().await?;
            let admitted: i64 = redis::Script::new(ADMIT_SCRIPT)
                .key(key.to_string())
                .arg(Utc::now().timestamp_millis())
                .arg(rule.window.as_millis() as i64)
                .arg(rule.max_requests as i64)
                .arg(Uuid::new_v4().to_string())
                .invoke_async(&mut *conn)
                .await?;
            Ok(admitted == 1)
        }

        async fn cooldown(&self, key: &WindowKey, rule: RateLimitRule) -> CacheResult<Duration> {
            let mut conn = self.pool.get().await?;
            let remaining_ms: i64 = redis::Script::new(COOLDOWN_SCRIPT)
                .key(key.to_string())
                .arg(Utc::now().timestamp_millis())
                .arg(rule.window.as_millis() as i64)
                .invoke_async(&mut *conn)
                .await?;
            Ok(Duration::from_millis(remaining_ms.max(0) as u64))
        }
    }

    #[async_trait]
    impl RateLimiter for RedisRateLimiter {
        async fn is_allowed(&self, identity: &str, action: ActionClass) -> bool {
            let key = WindowKey::new(identity, action);
            match self.admit(&key, self.rules.rule_for(action)).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(identity = %identity, action = action.as_str(), "rate limit exceeded");
                    false
                }
                Err(e) => {
                    warn!(error = %e, action = action.as_str(), "rate limiter unavailable, admitting");
                    true
                }
            }
        }

        async fn remaining_cooldown(&self, identity: &str, action: ActionClass) -> Duration {
            let key = WindowKey::new(identity, action);
            match self.cooldown(&key, self.rules.rule_for(action)).await {
                Ok(remaining) => remaining,
                Err(e) => {
                    warn!(error = %e, "rate limiter unavailable");
                    Duration::ZERO
                }
            }
        }
    }
}

//! Redis connection pool backing the shared rate limiter
//!
//! Redis is optional: the pool degrades gracefully, and callers fall back to
//! in-process behaviour when it cannot be reached.

pub mod error;
pub mod keys;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info, warn};

pub use error::{CacheError, CacheResult};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Redis pool configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 10,
            min_idle: 1,
            connection_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn from_app_config(config: &crate::config::CacheConfig) -> Option<Self> {
        let redis_url = config.redis_url.clone()?;
        Some(Self {
            redis_url,
            max_connections: config.max_connections.max(1),
            ..Self::default()
        })
    }
}

/// Initialize Redis connection pool with fault tolerance
pub async fn init_cache_pool(config: CacheConfig) -> CacheResult<RedisPool> {
    info!(
        max_connections = config.max_connections,
        "Initializing Redis connection pool"
    );

    let manager = RedisConnectionManager::new(config.redis_url.as_str()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_idle))
        .connection_timeout(config.connection_timeout)
        .max_lifetime(Some(config.max_lifetime))
        .idle_timeout(Some(config.idle_timeout))
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        // Don't fail here: the rate limiter fails open while Redis is down
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis connection pool initialized");
    Ok(pool)
}

/// PING through a pooled connection
pub async fn health_check(pool: &RedisPool) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_requires_a_url() {
        let without = crate::config::CacheConfig {
            redis_url: None,
            max_connections: 10,
        };
        assert!(CacheConfig::from_app_config(&without).is_none());

        let with = crate::config::CacheConfig {
            redis_url: Some("redis://cache:6379".to_string()),
            max_connections: 0,
        };
        let config = CacheConfig::from_app_config(&with).unwrap();
        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.max_connections, 1);
    }
}

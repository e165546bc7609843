//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

#[cfg(feature = "cache")]
use crate::cache::RedisPool;
use crate::database::store::EntityStore;
use crate::payments::registry::ProviderRegistry;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// Lowers the overall state; it never climbs back up.
    fn downgrade(&mut self, to: HealthState) {
        self.status = match (self.status, to) {
            (HealthState::Unhealthy, _) | (_, HealthState::Unhealthy) => HealthState::Unhealthy,
            (HealthState::Degraded, _) | (_, HealthState::Degraded) => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn EntityStore>,
    providers: ProviderRegistry,
    #[cfg(feature = "cache")]
    cache: Option<RedisPool>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn EntityStore>, providers: ProviderRegistry) -> Self {
        Self {
            store,
            providers,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: RedisPool) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The store is the only hard dependency. A missing cache or an empty
    /// provider registry degrades the service without taking it down.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, self.store.health_check()).await {
            Ok(Ok(())) => {
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::up(Some(start.elapsed().as_millis())),
                );
            }
            Ok(Err(e)) => {
                error!(error = %e, "Store health check failed");
                health_status
                    .checks
                    .insert("store".to_string(), ComponentHealth::down(Some(e.to_string())));
                health_status.downgrade(HealthState::Unhealthy);
            }
            Err(_) => {
                error!("Store health check timed out");
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                health_status.downgrade(HealthState::Unhealthy);
            }
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache {
            let start = Instant::now();
            match timeout(CHECK_TIMEOUT, crate::cache::health_check(pool)).await {
                Ok(Ok(())) => {
                    health_status.checks.insert(
                        "cache".to_string(),
                        ComponentHealth::up(Some(start.elapsed().as_millis())),
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Cache health check failed");
                    health_status
                        .checks
                        .insert("cache".to_string(), ComponentHealth::down(Some(e.to_string())));
                    health_status.downgrade(HealthState::Degraded);
                }
                Err(_) => {
                    warn!("Cache health check timed out");
                    health_status.checks.insert(
                        "cache".to_string(),
                        ComponentHealth::down(Some("Timeout".to_string())),
                    );
                    health_status.downgrade(HealthState::Degraded);
                }
            }
        }

        let enabled: Vec<&str> = self.providers.list().iter().map(|p| p.as_str()).collect();
        if enabled.is_empty() {
            health_status.checks.insert(
                "providers".to_string(),
                ComponentHealth::warning(None, Some("no payment providers registered".to_string())),
            );
            health_status.downgrade(HealthState::Degraded);
        } else {
            health_status.checks.insert(
                "providers".to_string(),
                ComponentHealth {
                    status: ComponentState::Up,
                    response_time_ms: None,
                    details: Some(enabled.join(",")),
                },
            );
        }

        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryEntityStore;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
    }

    #[test]
    fn test_downgrade_never_recovers() {
        let mut status = HealthStatus::new();
        status.downgrade(HealthState::Degraded);
        status.downgrade(HealthState::Healthy);
        assert_eq!(status.status, HealthState::Degraded);
        status.downgrade(HealthState::Unhealthy);
        status.downgrade(HealthState::Degraded);
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_empty_registry_degrades() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryEntityStore::new()),
            ProviderRegistry::new(),
        );
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["store"].status, ComponentState::Up);
        assert_eq!(status.checks["providers"].status, ComponentState::Warning);
    }
}

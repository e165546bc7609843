use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use paybridge_backend::api::{self, AppState};
use paybridge_backend::config::AppConfig;
use paybridge_backend::database::memory::InMemoryEntityStore;
use paybridge_backend::database::store::EntityStore;
use paybridge_backend::health::HealthChecker;
use paybridge_backend::logging::init_tracing;
use paybridge_backend::payments::registry::ProviderRegistry;
use paybridge_backend::services::{
    InMemoryRateLimiter, LocalReceiptService, OrchestratorConfig, OrderService,
    PaymentOrchestrator, RateLimiter, ReceiptService, RefundService, SupportService,
    WebhookProcessor,
};
use paybridge_backend::workers::payment_monitor::{PaymentMonitorConfig, PaymentMonitorWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    use paybridge_backend::database::{init_pool_from_config, postgres::PgEntityStore};

    if config.database.url.is_none() {
        warn!("DATABASE_URL not set, using the in-memory store");
        return Ok(Arc::new(InMemoryEntityStore::new()));
    }

    let pool = init_pool_from_config(&config.database)
        .await
        .context("failed to connect to the database")?;
    let store = PgEntityStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to apply the database schema")?;
    info!("Postgres entity store ready");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    if config.database.url.is_some() {
        warn!("DATABASE_URL is set but the database feature is disabled, using the in-memory store");
    }
    Ok(Arc::new(InMemoryEntityStore::new()))
}

#[cfg(feature = "cache")]
async fn build_rate_limiter(
    config: &AppConfig,
    health: HealthChecker,
) -> (Arc<dyn RateLimiter>, HealthChecker) {
    use paybridge_backend::cache::{init_cache_pool, CacheConfig};
    use paybridge_backend::services::rate_limiter::RedisRateLimiter;

    let Some(cache_config) = CacheConfig::from_app_config(&config.cache) else {
        info!("REDIS_URL not set, rate limiting is per process");
        return (
            Arc::new(InMemoryRateLimiter::new(config.rate_limits.clone())),
            health,
        );
    };

    match init_cache_pool(cache_config).await {
        Ok(pool) => {
            info!("Redis rate limiter ready");
            (
                Arc::new(RedisRateLimiter::new(pool.clone(), config.rate_limits.clone())),
                health.with_cache(pool),
            )
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, falling back to the in-process rate limiter");
            (
                Arc::new(InMemoryRateLimiter::new(config.rate_limits.clone())),
                health,
            )
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn build_rate_limiter(
    config: &AppConfig,
    health: HealthChecker,
) -> (Arc<dyn RateLimiter>, HealthChecker) {
    (
        Arc::new(InMemoryRateLimiter::new(config.rate_limits.clone())),
        health,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        default_currency = %config.payments.default_currency,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;

    let providers = ProviderRegistry::from_env().context("failed to configure payment providers")?;
    let enabled: Vec<&str> = providers.list().iter().map(|p| p.as_str()).collect();
    if enabled.is_empty() {
        warn!("No payment providers configured; payment initiation will be rejected");
    } else {
        info!(providers = ?enabled, "Payment providers registered");
    }

    let receipts: Arc<dyn ReceiptService> =
        Arc::new(LocalReceiptService::new(config.receipts.directory.clone()));

    let orchestrator = Arc::new(
        PaymentOrchestrator::new(
            store.clone(),
            providers.clone(),
            OrchestratorConfig::from(&config.payments),
        )
        .with_receipts(receipts.clone()),
    );
    let webhooks = Arc::new(WebhookProcessor::new(orchestrator.clone()));
    let refunds = Arc::new(
        RefundService::new(
            store.clone(),
            providers.clone(),
            config.payments.provider_timeout,
        )
        .with_receipts(receipts.clone()),
    );
    let orders = Arc::new(OrderService::new(store.clone(), config.payments.clone()));
    let support = Arc::new(SupportService::new(store.clone()));

    let health = HealthChecker::new(store.clone(), providers.clone());
    let (rate_limiter, health) = build_rate_limiter(&config, health).await;

    if config.admin.api_token.is_none() {
        warn!("ADMIN_API_TOKEN not set, admin endpoints are unauthenticated");
    }

    // Reconciliation worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_enabled = std::env::var("PAYMENT_MONITOR_ENABLED")
        .map(|v| v != "false")
        .unwrap_or(true);
    let monitor_handle = if monitor_enabled {
        let worker = PaymentMonitorWorker::new(orchestrator.clone(), PaymentMonitorConfig::from_env());
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        info!("Payment monitor disabled");
        None
    };

    let state = AppState {
        orchestrator,
        webhooks,
        refunds,
        orders,
        support,
        rate_limiter,
        receipts,
        health,
        admin_token: config.admin.api_token.clone(),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await
        .context("server error")?;

    if let Some(handle) = monitor_handle {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "payment monitor task panicked"),
            Err(_) => warn!("payment monitor did not stop within 10s"),
        }
    }

    info!("Server stopped");
    Ok(())
}

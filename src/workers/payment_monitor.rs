use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::services::payment_orchestrator::{PaymentOrchestrator, ReconcileSummary};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaymentMonitorConfig {
    /// How often the worker wakes up to poll providers.
    pub poll_interval: Duration,
    /// Pending payments younger than this are left to their callbacks.
    pub min_age: Duration,
    /// Maximum number of pending payments polled per cycle.
    pub batch_size: i64,
}

impl Default for PaymentMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            min_age: Duration::from_secs(300),
            batch_size: 50,
        }
    }
}

impl PaymentMonitorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("PAYMENT_MONITOR_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.min_age = Duration::from_secs(
            std::env::var("PAYMENT_MONITOR_MIN_AGE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.min_age.as_secs()),
        );
        cfg.batch_size = std::env::var("PAYMENT_MONITOR_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Settles payments whose callback never arrived by polling providers that
/// support status queries.
pub struct PaymentMonitorWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    config: PaymentMonitorConfig,
}

impl PaymentMonitorWorker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, config: PaymentMonitorConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            min_age_secs = self.config.min_age.as_secs(),
            batch_size = self.config.batch_size,
            "payment monitor worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment monitor worker stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("payment monitor worker stopped");
    }

    /// One reconciliation pass. Failures are logged and never end the loop.
    pub async fn run_cycle(&self) -> Option<ReconcileSummary> {
        match self
            .orchestrator
            .reconcile_pending(self.config.min_age, self.config.batch_size)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "payment monitor cycle failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryEntityStore;
    use crate::payments::registry::ProviderRegistry;
    use crate::services::payment_orchestrator::OrchestratorConfig;

    fn orchestrator() -> Arc<PaymentOrchestrator> {
        Arc::new(PaymentOrchestrator::new(
            Arc::new(InMemoryEntityStore::new()),
            ProviderRegistry::new(),
            OrchestratorConfig::default(),
        ))
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = PaymentMonitorConfig::default();
        assert_eq!(cfg.min_age, Duration::from_secs(300));
        assert_eq!(cfg.batch_size, 50);
    }

    #[tokio::test]
    async fn empty_cycle_reports_nothing_checked() {
        let worker = PaymentMonitorWorker::new(orchestrator(), PaymentMonitorConfig::default());
        let summary = worker.run_cycle().await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let worker = PaymentMonitorWorker::new(
            orchestrator(),
            PaymentMonitorConfig {
                poll_interval: Duration::from_millis(10),
                ..PaymentMonitorConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{
    BitPayProvider, CardnetProvider, CoinGateProvider, MpesaProvider, MtnMomoProvider,
    PayPalProvider,
};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Adapters keyed by provider name. Owned by the orchestrator; there is no global instance.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the adapters listed in `ENABLED_PAYMENT_PROVIDERS` (all of them when unset).
    pub fn from_env() -> GatewayResult<Self> {
        let enabled = match std::env::var("ENABLED_PAYMENT_PROVIDERS") {
            Ok(raw) => parse_enabled(&raw)?,
            Err(_) => ProviderName::ALL.to_vec(),
        };

        let mut registry = Self::new();
        for name in enabled {
            let provider: Arc<dyn PaymentProvider> = match name {
                ProviderName::Cardnet => Arc::new(CardnetProvider::from_env()?),
                ProviderName::PayPal => Arc::new(PayPalProvider::from_env()?),
                ProviderName::Mpesa => Arc::new(MpesaProvider::from_env()?),
                ProviderName::MtnMomo => Arc::new(MtnMomoProvider::from_env()?),
                ProviderName::BitPay => Arc::new(BitPayProvider::from_env()?),
                ProviderName::CoinGate => Arc::new(CoinGateProvider::from_env()?),
            };
            registry.register(provider);
        }

        info!(providers = ?registry.list(), "payment providers registered");
        Ok(registry)
    }

    /// Registers under the adapter's own name, replacing any previous entry.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&name).cloned()
    }

    pub fn contains(&self, name: ProviderName) -> bool {
        self.providers.contains_key(&name)
    }

    /// Registered names in declaration order.
    pub fn list(&self) -> Vec<ProviderName> {
        ProviderName::ALL
            .into_iter()
            .filter(|name| self.providers.contains_key(name))
            .collect()
    }

    /// Registered names whose adapters can settle a payment by status polling.
    pub fn pollable(&self) -> Vec<ProviderName> {
        ProviderName::ALL
            .into_iter()
            .filter(|name| {
                self.providers
                    .get(name)
                    .is_some_and(|p| p.supports_status_polling())
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn parse_enabled(raw: &str) -> GatewayResult<Vec<ProviderName>> {
    let mut enabled = Vec::new();
    for part in raw.split(',') {
        let value = part.trim();
        if value.is_empty() {
            continue;
        }
        let name = ProviderName::from_str(value).map_err(|e| GatewayError::ValidationError {
            message: e.to_string(),
            field: Some("ENABLED_PAYMENT_PROVIDERS".to_string()),
        })?;
        if !enabled.contains(&name) {
            enabled.push(name);
        }
    }
    Ok(enabled)
}

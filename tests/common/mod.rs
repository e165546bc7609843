#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use paybridge_backend::api::AppState;
use paybridge_backend::config::{PaymentLimitsConfig, RateLimitConfig};
use paybridge_backend::database::memory::InMemoryEntityStore;
use paybridge_backend::database::models::ConfirmationOutcome;
use paybridge_backend::database::store::EntityStore;
use paybridge_backend::health::HealthChecker;
use paybridge_backend::payments::error::{GatewayError, GatewayResult};
use paybridge_backend::payments::provider::PaymentProvider;
use paybridge_backend::payments::registry::ProviderRegistry;
use paybridge_backend::payments::types::{
    CallbackEvent, ConfirmContext, InitiateRequest, InitiateResponse, ProviderName,
    ProviderStatus, RefundRequest, RefundResponse, StatusResponse, UserAction,
};
use paybridge_backend::services::{
    InMemoryRateLimiter, LocalReceiptService, OrchestratorConfig, OrderService,
    PaymentOrchestrator, RefundService, SupportService, WebhookProcessor,
};

pub const GOOD_SIGNATURE: &str = "good-signature";

/// Adapter double. Provider references are `fake_<payment_ref>`; callbacks are
/// `{"ref": .., "status": "succeeded" | "failed" | "pending"}` and must carry
/// [`GOOD_SIGNATURE`].
pub struct FakeProvider {
    pub name: ProviderName,
    pub reject_initiation: bool,
    pub refund_delay: Duration,
    pub refund_calls: AtomicUsize,
    pub initiate_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    /// Lets a test inspect the store while `initiate` is in flight
    pub store: Option<Arc<InMemoryEntityStore>>,
    pub seen_pending_during_initiate: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            reject_initiation: false,
            refund_delay: Duration::ZERO,
            refund_calls: AtomicUsize::new(0),
            initiate_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            store: None,
            seen_pending_during_initiate: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = &self.store {
            if let Ok(Some(_)) = store.find_payment(&request.payment_reference).await {
                self.seen_pending_during_initiate.fetch_add(1, Ordering::SeqCst);
            }
        }
        if self.reject_initiation {
            return Err(GatewayError::GatewayRejected {
                provider: self.name.to_string(),
                message: "card declined".to_string(),
                provider_code: Some("card_declined".to_string()),
            });
        }
        Ok(InitiateResponse {
            provider_reference: format!("fake_{}", request.payment_reference),
            action: UserAction::Redirect {
                url: format!("https://pay.example/{}", request.payment_reference),
            },
            raw: json!({"id": format!("fake_{}", request.payment_reference)}),
        })
    }

    async fn confirm(
        &self,
        provider_reference: &str,
        context: ConfirmContext,
    ) -> GatewayResult<StatusResponse> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatusResponse {
            status: ProviderStatus::Succeeded,
            provider_reference: provider_reference.to_string(),
            failure_reason: None,
            raw: json!({"confirmed": true, "payer_id": context.payer_id}),
        })
    }

    async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse> {
        Ok(StatusResponse {
            status: ProviderStatus::Succeeded,
            provider_reference: provider_reference.to_string(),
            failure_reason: None,
            raw: json!({"polled": true}),
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refund_delay.is_zero() {
            tokio::time::sleep(self.refund_delay).await;
        }
        Ok(RefundResponse {
            refund_reference: format!("re_{}", request.provider_reference),
            raw: json!({"amount": request.amount.to_decimal_string()}),
        })
    }

    fn verify_callback(&self, _payload: &[u8], signature: Option<&str>) -> GatewayResult<()> {
        if signature == Some(GOOD_SIGNATURE) {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature {
                message: "signature mismatch".to_string(),
            })
        }
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(e.to_string()))?;
        let provider_reference = value["ref"]
            .as_str()
            .ok_or_else(|| GatewayError::malformed("missing ref"))?
            .to_string();
        let outcome = match value["status"].as_str() {
            Some("succeeded") => Some(ConfirmationOutcome::Succeeded),
            Some("failed") => Some(ConfirmationOutcome::Failed),
            Some("pending") => Some(ConfirmationOutcome::Pending),
            _ => None,
        };
        Ok(CallbackEvent {
            provider_reference,
            outcome,
            reason: value["reason"].as_str().map(str::to_string),
            event_type: "fake.event".to_string(),
            payload: value,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "DOP"]
    }
}

pub struct Harness {
    pub store: Arc<InMemoryEntityStore>,
    pub provider: Arc<FakeProvider>,
    /// Stands in for PayPal's approval-return flow
    pub paypal: Arc<FakeProvider>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub refunds: Arc<RefundService>,
    pub orders: Arc<OrderService>,
    pub receipts: Arc<LocalReceiptService>,
}

pub fn receipts_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("paybridge-receipts-{}", uuid::Uuid::new_v4()))
}

pub fn harness_with(configure: impl FnOnce(&mut FakeProvider)) -> Harness {
    let store = Arc::new(InMemoryEntityStore::new());
    let mut provider = FakeProvider::new(ProviderName::Cardnet);
    provider.store = Some(store.clone());
    configure(&mut provider);
    let provider = Arc::new(provider);
    let paypal = Arc::new(FakeProvider::new(ProviderName::PayPal));

    let registry = ProviderRegistry::new()
        .with_provider(provider.clone())
        .with_provider(paypal.clone());
    let receipts = Arc::new(LocalReceiptService::new(receipts_dir()));
    let limits = PaymentLimitsConfig::default();

    let orchestrator = Arc::new(
        PaymentOrchestrator::new(
            store.clone(),
            registry.clone(),
            OrchestratorConfig::from(&limits),
        )
        .with_receipts(receipts.clone()),
    );
    let webhooks = Arc::new(WebhookProcessor::new(orchestrator.clone()));
    let refunds = Arc::new(
        RefundService::new(store.clone(), registry, Duration::from_secs(5))
            .with_receipts(receipts.clone()),
    );
    let orders = Arc::new(OrderService::new(store.clone(), limits));

    Harness {
        store,
        provider,
        paypal,
        orchestrator,
        webhooks,
        refunds,
        orders,
        receipts,
    }
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

impl Harness {
    pub fn app_state(&self, admin_token: Option<&str>) -> AppState {
        let registry = self.orchestrator.providers().clone();
        AppState {
            orchestrator: self.orchestrator.clone(),
            webhooks: self.webhooks.clone(),
            refunds: self.refunds.clone(),
            orders: self.orders.clone(),
            support: Arc::new(SupportService::new(self.store.clone())),
            rate_limiter: Arc::new(InMemoryRateLimiter::new(RateLimitConfig::default())),
            receipts: self.receipts.clone(),
            health: HealthChecker::new(self.store.clone(), registry),
            admin_token: admin_token.map(str::to_string),
        }
    }
}

pub fn usd(amount: i64) -> BigDecimal {
    BigDecimal::from(amount)
}

pub fn callback(provider_ref: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({"ref": provider_ref, "status": status})).unwrap()
}

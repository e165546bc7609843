//! Payment Orchestrator Service
//!
//! Creates payments against orders, dispatches them to the registered
//! provider adapter, and is the single place where confirmation outcomes are
//! applied to stored state.
//!
//! Dispatch commits the `pending` payment before the adapter is called and
//! records the adapter's answer in a second write, so no storage lock is ever
//! held across a provider call.

use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PaymentLimitsConfig;
use crate::database::error::DatabaseError;
use crate::database::models::{
    generate_payment_ref, ConfirmationOutcome, ConfirmationResult, InitiationRecord, NewPayment,
    Order, OrderStatus, Payment, PaymentStatus,
};
use crate::database::store::EntityStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::error::GatewayError;
use crate::payments::provider::PaymentProvider;
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{
    ConfirmContext, CustomerContact, InitiateRequest, Money, ProviderName, UserAction,
};
use crate::services::receipts::ReceiptService;

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
    /// Outer bound on a single adapter call
    pub provider_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&PaymentLimitsConfig::default())
    }
}

impl From<&PaymentLimitsConfig> for OrchestratorConfig {
    fn from(limits: &PaymentLimitsConfig) -> Self {
        Self {
            min_amount: limits.min_amount.clone(),
            max_amount: limits.max_amount.clone(),
            provider_timeout: limits.provider_timeout,
        }
    }
}

// ============================================================================
// Request / Result Types
// ============================================================================

/// Payer details forwarded to the adapter
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub order_ref: String,
    pub provider: ProviderName,
    pub amount: BigDecimal,
    pub currency: String,
    pub context: DispatchContext,
}

#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// Adapter accepted; the payment stays `pending` until confirmed
    Initiated {
        payment: Payment,
        action: UserAction,
    },
    /// Adapter refused or could not be reached. `payment.status` tells which:
    /// `failed` for a refusal, `pending` when the outcome is unknown.
    Failed {
        payment: Payment,
        error: GatewayError,
    },
}

impl DispatchResult {
    pub fn payment(&self) -> &Payment {
        match self {
            DispatchResult::Initiated { payment, .. } | DispatchResult::Failed { payment, .. } => {
                payment
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("invalid currency code: {currency}")]
    InvalidCurrency { currency: String },

    #[error("a phone number is required for {provider}")]
    PhoneNumberRequired { provider: ProviderName },

    #[error("order not found: {order_ref}")]
    OrderNotFound { order_ref: String },

    #[error("order {order_ref} is {status} and cannot take a payment")]
    OrderNotPayable {
        order_ref: String,
        status: OrderStatus,
    },

    #[error("payment not found: {payment_ref}")]
    PaymentNotFound { payment_ref: String },

    #[error("no adapter registered for provider {provider}")]
    UnsupportedProvider { provider: ProviderName },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::InvalidAmount { amount, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason })
            }
            OrchestratorError::InvalidCurrency { currency } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "expected a 3-letter ISO code".to_string(),
                })
            }
            OrchestratorError::PhoneNumberRequired { .. } => {
                AppErrorKind::Validation(ValidationError::MissingField {
                    field: "phone".to_string(),
                })
            }
            OrchestratorError::OrderNotFound { order_ref } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_ref })
            }
            OrchestratorError::OrderNotPayable { order_ref, status } => {
                AppErrorKind::Domain(DomainError::OrderNotPayable {
                    order_ref,
                    status: status.to_string(),
                })
            }
            OrchestratorError::PaymentNotFound { payment_ref } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { payment_ref })
            }
            OrchestratorError::UnsupportedProvider { provider } => {
                AppErrorKind::Domain(DomainError::UnsupportedProvider {
                    provider: provider.to_string(),
                })
            }
            OrchestratorError::Gateway(e) => return e.into(),
            OrchestratorError::Storage(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    store: Arc<dyn EntityStore>,
    providers: ProviderRegistry,
    config: OrchestratorConfig,
    receipts: Option<Arc<dyn ReceiptService>>,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        providers: ProviderRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            providers,
            config,
            receipts: None,
        }
    }

    /// Generates a receipt the first time a payment completes.
    pub fn with_receipts(mut self, receipts: Arc<dyn ReceiptService>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    // =========================================================================
    // Validation
    // =========================================================================

    pub fn validate_amount(&self, amount: &BigDecimal) -> OrchestratorResult<()> {
        if *amount <= BigDecimal::from(0) {
            return Err(OrchestratorError::InvalidAmount {
                amount: amount.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if *amount < self.config.min_amount || *amount > self.config.max_amount {
            return Err(OrchestratorError::InvalidAmount {
                amount: amount.to_string(),
                reason: format!(
                    "must be between {} and {}",
                    self.config.min_amount, self.config.max_amount
                ),
            });
        }
        Ok(())
    }

    /// Normalizes to upper case; only 3-letter alphabetic codes pass.
    pub fn normalize_currency(currency: &str) -> OrchestratorResult<String> {
        let code = currency.trim().to_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OrchestratorError::InvalidCurrency {
                currency: currency.to_string(),
            });
        }
        Ok(code)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub async fn dispatch_payment(
        &self,
        request: DispatchRequest,
    ) -> OrchestratorResult<DispatchResult> {
        self.validate_amount(&request.amount)?;
        let currency = Self::normalize_currency(&request.currency)?;
        let phone = request
            .context
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if request.provider.requires_phone() && phone.is_none() {
            return Err(OrchestratorError::PhoneNumberRequired {
                provider: request.provider,
            });
        }

        let order = self
            .store
            .find_order(&request.order_ref)
            .await?
            .ok_or_else(|| OrchestratorError::OrderNotFound {
                order_ref: request.order_ref.clone(),
            })?;
        if order.status != OrderStatus::PendingPayment {
            return Err(OrchestratorError::OrderNotPayable {
                order_ref: order.order_ref,
                status: order.status,
            });
        }

        let payment = self
            .store
            .insert_payment(NewPayment {
                payment_ref: generate_payment_ref(),
                order_id: order.id,
                user_id: order.user_id,
                amount: request.amount.clone(),
                currency: currency.clone(),
                provider: request.provider,
            })
            .await?;

        info!(
            payment_ref = %payment.payment_ref,
            order_ref = %order.order_ref,
            provider = %request.provider,
            "payment created"
        );

        let Some(adapter) = self.providers.get(request.provider) else {
            warn!(provider = %request.provider, payment_ref = %payment.payment_ref, "no adapter registered");
            self.store
                .record_initiation(
                    &payment.payment_ref,
                    InitiationRecord::Failed {
                        response: json!({
                            "error": "unsupported_provider",
                            "message": format!("no adapter registered for {}", request.provider),
                        }),
                    },
                )
                .await?;
            return Err(OrchestratorError::UnsupportedProvider {
                provider: request.provider,
            });
        };

        let initiate = InitiateRequest {
            amount: Money::new(request.amount, currency),
            order_reference: order.order_ref.clone(),
            payment_reference: payment.payment_ref.clone(),
            description: order.description.clone(),
            customer: CustomerContact {
                email: request.context.email,
                phone: phone.map(str::to_string),
            },
            return_url: request.context.return_url,
        };

        let outcome = self.call_adapter(adapter.as_ref(), initiate).await;

        match outcome {
            Ok(response) => {
                let payment = self
                    .store
                    .record_initiation(
                        &payment.payment_ref,
                        InitiationRecord::Accepted {
                            provider_reference: response.provider_reference.clone(),
                            response: response.raw,
                        },
                    )
                    .await?;
                info!(
                    payment_ref = %payment.payment_ref,
                    provider_ref = %response.provider_reference,
                    "payment initiated"
                );
                Ok(DispatchResult::Initiated {
                    payment,
                    action: response.action,
                })
            }
            Err(gateway_error) => {
                let response = gateway_error.to_audit_json();
                let record = if gateway_error.is_inconclusive() {
                    InitiationRecord::Inconclusive { response }
                } else {
                    InitiationRecord::Failed { response }
                };
                let payment = self.store.record_initiation(&payment.payment_ref, record).await?;
                warn!(
                    payment_ref = %payment.payment_ref,
                    status = %payment.status,
                    error = %gateway_error,
                    "payment initiation failed"
                );
                Ok(DispatchResult::Failed {
                    payment,
                    error: gateway_error,
                })
            }
        }
    }

    async fn call_adapter(
        &self,
        adapter: &dyn PaymentProvider,
        request: InitiateRequest,
    ) -> Result<crate::payments::types::InitiateResponse, GatewayError> {
        match tokio::time::timeout(self.config.provider_timeout, adapter.initiate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::transport(
                adapter.name().as_str(),
                format!(
                    "initiate timed out after {}ms",
                    self.config.provider_timeout.as_millis()
                ),
            )),
        }
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// The single mutation point for confirmation outcomes.
    pub async fn apply_confirmation(
        &self,
        provider: ProviderName,
        provider_reference: &str,
        outcome: ConfirmationOutcome,
        raw_payload: JsonValue,
    ) -> OrchestratorResult<ConfirmationResult> {
        let result = self
            .store
            .apply_confirmation(provider, provider_reference, outcome, raw_payload)
            .await?;

        match &result {
            ConfirmationResult::Applied {
                payment,
                previous_status,
                order,
            } => {
                info!(
                    payment_ref = %payment.payment_ref,
                    provider = %provider,
                    from = %previous_status,
                    to = %payment.status,
                    order_confirmed = order.is_some(),
                    "confirmation applied"
                );
                if payment.status == PaymentStatus::Completed {
                    self.issue_receipt(payment, order.as_ref()).await;
                }
            }
            ConfirmationResult::Replayed { payment } => {
                info!(payment_ref = %payment.payment_ref, status = %payment.status, "duplicate confirmation ignored");
            }
            ConfirmationResult::Ignored { payment } => {
                info!(
                    payment_ref = %payment.payment_ref,
                    status = %payment.status,
                    outcome = ?outcome,
                    "stale or non-terminal confirmation ignored"
                );
            }
            ConfirmationResult::UnknownTransaction => {
                warn!(provider = %provider, provider_ref = %provider_reference, "confirmation for unknown transaction");
            }
        }

        Ok(result)
    }

    /// Runs the synchronous confirmation leg (approval return, 3-D Secure) and
    /// applies its result.
    pub async fn confirm_with_provider(
        &self,
        provider: ProviderName,
        provider_reference: &str,
        context: ConfirmContext,
    ) -> OrchestratorResult<ConfirmationResult> {
        let Some(payment) = self
            .store
            .find_payment_by_provider_ref(provider, provider_reference)
            .await?
        else {
            warn!(provider = %provider, provider_ref = %provider_reference, "return for unknown transaction");
            return Ok(ConfirmationResult::UnknownTransaction);
        };

        // The provider refuses a second execute; a repeated return is a replay
        if matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::Refunded
        ) {
            return Ok(ConfirmationResult::Replayed { payment });
        }

        let adapter = self
            .providers
            .get(provider)
            .ok_or(OrchestratorError::UnsupportedProvider { provider })?;
        let status = adapter.confirm(provider_reference, context).await?;

        match status.status.outcome() {
            Some(outcome) => {
                self.apply_confirmation(provider, provider_reference, outcome, status.raw)
                    .await
            }
            None => Ok(ConfirmationResult::Ignored { payment }),
        }
    }

    /// Notes that the payer abandoned the provider's approval page.
    ///
    /// The browser leg is unauthenticated, so the payment keeps its status; the
    /// provider's own answer arrives later through polling or a callback.
    pub async fn record_payer_cancel(
        &self,
        provider: ProviderName,
        provider_reference: &str,
    ) -> OrchestratorResult<ConfirmationResult> {
        match self
            .store
            .find_payment_by_provider_ref(provider, provider_reference)
            .await?
        {
            Some(payment) => {
                info!(
                    payment_ref = %payment.payment_ref,
                    provider = %provider,
                    status = %payment.status,
                    "payer cancelled at provider; awaiting provider confirmation"
                );
                Ok(ConfirmationResult::Ignored { payment })
            }
            None => {
                warn!(provider = %provider, provider_ref = %provider_reference, "cancel for unknown transaction");
                Ok(ConfirmationResult::UnknownTransaction)
            }
        }
    }

    /// Polls adapters for pending payments created before `min_age` ago and
    /// applies whatever they report.
    pub async fn reconcile_pending(
        &self,
        min_age: Duration,
        batch_size: i64,
    ) -> OrchestratorResult<ReconcileSummary> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero());
        let pollable = self.providers.pollable();
        if pollable.is_empty() {
            return Ok(ReconcileSummary::default());
        }
        let pending = self
            .store
            .list_stale_pending_payments(cutoff, &pollable, batch_size)
            .await?;

        let mut summary = ReconcileSummary::default();
        for payment in pending {
            summary.checked += 1;
            let (Some(adapter), Some(provider_ref)) = (
                self.providers.get(payment.provider),
                payment.provider_reference.as_deref(),
            ) else {
                summary.skipped += 1;
                continue;
            };

            match adapter.query_status(provider_ref).await {
                Ok(status) => match status.status.outcome() {
                    Some(outcome @ (ConfirmationOutcome::Succeeded | ConfirmationOutcome::Failed)) => {
                        match self
                            .apply_confirmation(payment.provider, provider_ref, outcome, status.raw)
                            .await
                        {
                            Ok(ConfirmationResult::Applied { .. }) => summary.applied += 1,
                            Ok(_) => summary.unchanged += 1,
                            Err(e) => {
                                error!(payment_ref = %payment.payment_ref, error = %e, "reconciliation write failed");
                                summary.failed += 1;
                            }
                        }
                    }
                    _ => summary.unchanged += 1,
                },
                Err(GatewayError::UnsupportedOperation { .. }) => summary.skipped += 1,
                Err(e) => {
                    warn!(payment_ref = %payment.payment_ref, error = %e, "status poll failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                applied = summary.applied,
                skipped = summary.skipped,
                failed = summary.failed,
                "pending payments reconciled"
            );
        }
        Ok(summary)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_payment(&self, payment_ref: &str) -> OrchestratorResult<Payment> {
        self.store
            .find_payment(payment_ref)
            .await?
            .ok_or_else(|| OrchestratorError::PaymentNotFound {
                payment_ref: payment_ref.to_string(),
            })
    }

    async fn issue_receipt(&self, payment: &Payment, order: Option<&Order>) {
        let Some(receipts) = &self.receipts else {
            return;
        };

        let order = match order {
            Some(order) => Some(order.clone()),
            None => self.store.find_order_by_id(payment.order_id).await.ok().flatten(),
        };
        let user = self.store.find_user_by_id(payment.user_id).await.ok().flatten();
        let (Some(order), Some(user)) = (order, user) else {
            warn!(payment_ref = %payment.payment_ref, "receipt skipped: order or user missing");
            return;
        };

        if let Err(e) = receipts.payment_receipt(&user, &order, payment).await {
            warn!(payment_ref = %payment.payment_ref, error = %e, "receipt generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryEntityStore;
    use crate::database::models::{generate_order_ref, NewOrder};
    use crate::payments::error::GatewayResult;
    use crate::payments::types::{
        CallbackEvent, InitiateResponse, ProviderStatus, RefundRequest, RefundResponse,
        StatusResponse,
    };
    use async_trait::async_trait;

    struct ScriptedProvider {
        name: ProviderName,
        initiate: fn(&InitiateRequest) -> GatewayResult<InitiateResponse>,
        pollable: bool,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(
            name: ProviderName,
            initiate: fn(&InitiateRequest) -> GatewayResult<InitiateResponse>,
        ) -> Self {
            Self {
                name,
                initiate,
                pollable: true,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for ScriptedProvider {
        fn name(&self) -> ProviderName {
            self.name
        }

        async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.initiate)(&request)
        }

        async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse> {
            Ok(StatusResponse {
                status: ProviderStatus::Succeeded,
                provider_reference: provider_reference.to_string(),
                failure_reason: None,
                raw: json!({"polled": true}),
            })
        }

        async fn refund(&self, _request: RefundRequest) -> GatewayResult<RefundResponse> {
            Err(GatewayError::RefundNotSupported {
                provider: self.name.to_string(),
            })
        }

        fn supports_status_polling(&self) -> bool {
            self.pollable
        }

        fn parse_callback(&self, _payload: &[u8]) -> GatewayResult<CallbackEvent> {
            Err(GatewayError::malformed("not used"))
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["USD"]
        }
    }

    fn accepting(request: &InitiateRequest) -> GatewayResult<InitiateResponse> {
        Ok(InitiateResponse {
            provider_reference: format!("ref_{}", request.payment_reference),
            action: UserAction::Poll,
            raw: json!({"ok": true}),
        })
    }

    fn rejecting(_: &InitiateRequest) -> GatewayResult<InitiateResponse> {
        Err(GatewayError::GatewayRejected {
            provider: "cardnet".to_string(),
            message: "card declined".to_string(),
            provider_code: Some("card_declined".to_string()),
        })
    }

    fn timing_out(_: &InitiateRequest) -> GatewayResult<InitiateResponse> {
        Err(GatewayError::transport("cardnet", "timed out"))
    }

    async fn setup(
        initiate: fn(&InitiateRequest) -> GatewayResult<InitiateResponse>,
    ) -> (PaymentOrchestrator, Arc<InMemoryEntityStore>, Order) {
        let store = Arc::new(InMemoryEntityStore::new());
        let user = store.get_or_create_user("tg-1").await.unwrap();
        let order = store
            .insert_order(NewOrder {
                order_ref: generate_order_ref(),
                user_id: user.id,
                amount: BigDecimal::from(50),
                currency: "USD".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let registry = ProviderRegistry::new()
            .with_provider(Arc::new(ScriptedProvider::new(ProviderName::Cardnet, initiate)));
        let orchestrator =
            PaymentOrchestrator::new(store.clone(), registry, OrchestratorConfig::default());
        (orchestrator, store, order)
    }

    async fn seed_order(store: &InMemoryEntityStore) -> Order {
        let user = store.get_or_create_user("tg-1").await.unwrap();
        store
            .insert_order(NewOrder {
                order_ref: generate_order_ref(),
                user_id: user.id,
                amount: BigDecimal::from(50),
                currency: "USD".to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    fn request(order: &Order, provider: ProviderName) -> DispatchRequest {
        DispatchRequest {
            order_ref: order.order_ref.clone(),
            provider,
            amount: BigDecimal::from(50),
            currency: "usd".to_string(),
            context: DispatchContext::default(),
        }
    }

    #[tokio::test]
    async fn accepted_initiation_stays_pending_with_reference() {
        let (orchestrator, _, order) = setup(accepting).await;
        let result = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();

        let DispatchResult::Initiated { payment, action } = result else {
            panic!("expected initiation");
        };
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.currency, "USD");
        assert_eq!(
            payment.provider_reference,
            Some(format!("ref_{}", payment.payment_ref))
        );
        assert_eq!(action, UserAction::Poll);
    }

    #[tokio::test]
    async fn rejection_fails_the_payment() {
        let (orchestrator, _, order) = setup(rejecting).await;
        let result = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();
        let DispatchResult::Failed { payment, error } = result else {
            panic!("expected failure");
        };
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(matches!(error, GatewayError::GatewayRejected { .. }));
        assert_eq!(
            payment.gateway_response.as_ref().unwrap()["provider_code"],
            "card_declined"
        );
    }

    #[tokio::test]
    async fn transport_error_leaves_payment_pending() {
        let (orchestrator, _, order) = setup(timing_out).await;
        let result = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();
        assert_eq!(result.payment().status, PaymentStatus::Pending);
        assert!(result.payment().gateway_response.is_some());
    }

    #[tokio::test]
    async fn unregistered_provider_records_failed_payment() {
        let (orchestrator, store, order) = setup(accepting).await;
        let err = orchestrator
            .dispatch_payment(request(&order, ProviderName::BitPay))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnsupportedProvider { .. }));

        let payments = store.list_order_payments(order.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn validation_failures_persist_nothing() {
        let (orchestrator, store, order) = setup(accepting).await;

        let mut bad_amount = request(&order, ProviderName::Cardnet);
        bad_amount.amount = BigDecimal::from(20_000);
        assert!(matches!(
            orchestrator.dispatch_payment(bad_amount).await,
            Err(OrchestratorError::InvalidAmount { .. })
        ));

        let mut bad_currency = request(&order, ProviderName::Cardnet);
        bad_currency.currency = "US1".to_string();
        assert!(matches!(
            orchestrator.dispatch_payment(bad_currency).await,
            Err(OrchestratorError::InvalidCurrency { .. })
        ));

        assert!(matches!(
            orchestrator
                .dispatch_payment(request(&order, ProviderName::Mpesa))
                .await,
            Err(OrchestratorError::PhoneNumberRequired { .. })
        ));

        assert!(store.list_order_payments(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paid_order_is_not_payable_again() {
        let (orchestrator, _, order) = setup(accepting).await;
        let first = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();
        let provider_ref = first.payment().provider_reference.clone().unwrap();
        orchestrator
            .apply_confirmation(
                ProviderName::Cardnet,
                &provider_ref,
                ConfirmationOutcome::Succeeded,
                json!({}),
            )
            .await
            .unwrap();

        let err = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::OrderNotPayable {
                status: OrderStatus::PaymentConfirmed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reconcile_applies_polled_success() {
        let (orchestrator, store, order) = setup(accepting).await;
        let dispatched = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();

        let summary = orchestrator
            .reconcile_pending(Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.applied, 1);

        let payment = store
            .find_payment(&dispatched.payment().payment_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn reconcile_reaches_pollable_payments_behind_unpollable_ones() {
        let store = Arc::new(InMemoryEntityStore::new());
        let order = seed_order(&store).await;
        let mut callback_only = ScriptedProvider::new(ProviderName::Mpesa, accepting);
        callback_only.pollable = false;
        let registry = ProviderRegistry::new()
            .with_provider(Arc::new(ScriptedProvider::new(ProviderName::Cardnet, timing_out)))
            .with_provider(Arc::new(callback_only))
            .with_provider(Arc::new(ScriptedProvider::new(ProviderName::BitPay, accepting)));
        let orchestrator =
            PaymentOrchestrator::new(store.clone(), registry, OrchestratorConfig::default());

        // No provider reference: the transport error left them pending
        for _ in 0..2 {
            let result = orchestrator
                .dispatch_payment(request(&order, ProviderName::Cardnet))
                .await
                .unwrap();
            assert_eq!(result.payment().status, PaymentStatus::Pending);
            assert!(result.payment().provider_reference.is_none());
        }
        let mut mpesa = request(&order, ProviderName::Mpesa);
        mpesa.context.phone = Some("254700000001".to_string());
        orchestrator.dispatch_payment(mpesa).await.unwrap();
        let bitpay = orchestrator
            .dispatch_payment(request(&order, ProviderName::BitPay))
            .await
            .unwrap();

        let summary = orchestrator
            .reconcile_pending(Duration::ZERO, 2)
            .await
            .unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped, 0);

        let payment = store
            .find_payment(&bitpay.payment().payment_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn slow_adapter_is_cut_off_and_left_pending() {
        let store = Arc::new(InMemoryEntityStore::new());
        let order = seed_order(&store).await;
        let mut slow = ScriptedProvider::new(ProviderName::Cardnet, accepting);
        slow.delay = Duration::from_millis(500);
        let registry = ProviderRegistry::new().with_provider(Arc::new(slow));
        let config = OrchestratorConfig {
            provider_timeout: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        };
        let orchestrator = PaymentOrchestrator::new(store.clone(), registry, config);

        let result = orchestrator
            .dispatch_payment(request(&order, ProviderName::Cardnet))
            .await
            .unwrap();
        let DispatchResult::Failed { payment, error } = result else {
            panic!("expected the timeout to surface as a failed dispatch");
        };
        assert!(error.is_inconclusive());
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.provider_reference.is_none());
    }

    #[test]
    fn orchestrator_errors_map_to_http_statuses() {
        let not_found: AppError = OrchestratorError::OrderNotFound {
            order_ref: "ORD-x".to_string(),
        }
        .into();
        assert_eq!(not_found.status_code(), 404);

        let phone: AppError = OrchestratorError::PhoneNumberRequired {
            provider: ProviderName::Mpesa,
        }
        .into();
        assert_eq!(phone.status_code(), 400);

        let unsupported: AppError = OrchestratorError::UnsupportedProvider {
            provider: ProviderName::BitPay,
        }
        .into();
        assert_eq!(unsupported.status_code(), 400);
    }
}

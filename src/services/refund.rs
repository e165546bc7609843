//! Refunds against settled payments
//!
//! Eligibility is checked, the owning provider performs the refund, and only
//! then are the payment and its order updated together. The store re-checks
//! the payment status inside that final write.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::models::{Order, Payment, PaymentStatus, RefundApplication};
use crate::database::store::EntityStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::error::GatewayError;
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{Money, ProviderName, RefundRequest};
use crate::services::receipts::ReceiptService;

pub const DEFAULT_REFUND_REASON: &str = "Admin refund";

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("payment not found: {payment_ref}")]
    PaymentNotFound { payment_ref: String },

    #[error("payment {payment_ref} is {status} and cannot be refunded")]
    NotRefundable {
        payment_ref: String,
        status: PaymentStatus,
    },

    #[error("refund amount must be positive, got {amount}")]
    InvalidAmount { amount: BigDecimal },

    #[error("refund amount {requested} exceeds original amount {original}")]
    AmountExceedsOriginal {
        requested: BigDecimal,
        original: BigDecimal,
    },

    #[error("a refund for {payment_ref} is already in progress")]
    RefundInProgress { payment_ref: String },

    #[error("payment {payment_ref} has no provider reference to refund against")]
    MissingProviderReference { payment_ref: String },

    #[error("no adapter registered for provider {provider}")]
    UnsupportedProvider { provider: ProviderName },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<RefundError> for AppError {
    fn from(err: RefundError) -> Self {
        let kind = match err {
            RefundError::PaymentNotFound { payment_ref } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { payment_ref })
            }
            RefundError::NotRefundable {
                payment_ref,
                status,
            } => AppErrorKind::Domain(DomainError::NotRefundable {
                payment_ref,
                status: status.to_string(),
            }),
            RefundError::InvalidAmount { amount } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "must be positive".to_string(),
                })
            }
            RefundError::AmountExceedsOriginal {
                requested,
                original,
            } => AppErrorKind::Domain(DomainError::AmountExceedsOriginal {
                requested: requested.to_string(),
                original: original.to_string(),
            }),
            RefundError::RefundInProgress { payment_ref } => {
                AppErrorKind::Domain(DomainError::RefundInProgress { payment_ref })
            }
            RefundError::MissingProviderReference { payment_ref } => {
                AppErrorKind::Domain(DomainError::NotRefundable {
                    payment_ref,
                    status: "missing a provider reference".to_string(),
                })
            }
            RefundError::UnsupportedProvider { provider } => {
                AppErrorKind::Domain(DomainError::UnsupportedProvider {
                    provider: provider.to_string(),
                })
            }
            RefundError::Gateway(e) => return e.into(),
            RefundError::Storage(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type RefundResult<T> = Result<T, RefundError>;

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub payment: Payment,
    pub order: Order,
    pub refund_reference: String,
    pub refund_amount: BigDecimal,
    /// `None` when receipt generation failed; the refund still stands
    pub receipt_path: Option<String>,
}

/// Payment references with a refund currently running in this process
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Releases the in-flight slot on drop, including on early return.
struct InFlightGuard {
    in_flight: InFlight,
    payment_ref: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, payment_ref: &str) -> Option<Self> {
        let mut set = in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(payment_ref.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: in_flight.clone(),
            payment_ref: payment_ref.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.payment_ref);
    }
}

pub struct RefundService {
    store: Arc<dyn EntityStore>,
    providers: ProviderRegistry,
    receipts: Option<Arc<dyn ReceiptService>>,
    provider_timeout: Duration,
    in_flight: InFlight,
}

impl RefundService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        providers: ProviderRegistry,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            receipts: None,
            provider_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_receipts(mut self, receipts: Arc<dyn ReceiptService>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    /// Refunds `amount` (the full payment when `None`) and cancels the order.
    pub async fn refund(
        &self,
        payment_ref: &str,
        amount: Option<BigDecimal>,
        reason: &str,
    ) -> RefundResult<RefundOutcome> {
        let _guard = InFlightGuard::acquire(&self.in_flight, payment_ref).ok_or_else(|| {
            RefundError::RefundInProgress {
                payment_ref: payment_ref.to_string(),
            }
        })?;

        let payment = self
            .store
            .find_payment(payment_ref)
            .await?
            .ok_or_else(|| RefundError::PaymentNotFound {
                payment_ref: payment_ref.to_string(),
            })?;

        if payment.status != PaymentStatus::Completed {
            return Err(RefundError::NotRefundable {
                payment_ref: payment.payment_ref,
                status: payment.status,
            });
        }

        let refund_amount = amount.unwrap_or_else(|| payment.amount.clone());
        if refund_amount <= BigDecimal::from(0) {
            return Err(RefundError::InvalidAmount {
                amount: refund_amount,
            });
        }
        if refund_amount > payment.amount {
            return Err(RefundError::AmountExceedsOriginal {
                requested: refund_amount,
                original: payment.amount,
            });
        }

        let adapter = self
            .providers
            .get(payment.provider)
            .ok_or(RefundError::UnsupportedProvider {
                provider: payment.provider,
            })?;
        let provider_reference = payment.provider_reference.clone().ok_or_else(|| {
            RefundError::MissingProviderReference {
                payment_ref: payment.payment_ref.clone(),
            }
        })?;

        let request = RefundRequest {
            provider_reference,
            amount: Money::new(refund_amount.clone(), payment.currency.clone()),
            reason: reason.to_string(),
        };
        let response = match tokio::time::timeout(self.provider_timeout, adapter.refund(request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(payment_ref = %payment.payment_ref, error = %e, "provider refund failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(payment_ref = %payment.payment_ref, "provider refund timed out");
                return Err(GatewayError::transport(
                    payment.provider.as_str(),
                    format!("refund timed out after {}ms", self.provider_timeout.as_millis()),
                )
                .into());
            }
        };

        let record = json!({
            "refund_reference": response.refund_reference,
            "amount": refund_amount.to_string(),
            "currency": payment.currency,
            "reason": reason,
            "refunded_at": Utc::now().to_rfc3339(),
            "provider_response": response.raw,
        });

        let (payment, order) = match self.store.apply_refund(&payment.payment_ref, record).await? {
            RefundApplication::Applied { payment, order } => (payment, order),
            RefundApplication::NotRefundable { status } => {
                // The provider already refunded; the stored payment moved on meanwhile
                error!(
                    payment_ref = %payment.payment_ref,
                    status = %status,
                    refund_ref = %response.refund_reference,
                    "provider refund succeeded but payment was no longer refundable"
                );
                return Err(RefundError::NotRefundable {
                    payment_ref: payment.payment_ref,
                    status,
                });
            }
        };

        info!(
            payment_ref = %payment.payment_ref,
            order_ref = %order.order_ref,
            refund_ref = %response.refund_reference,
            amount = %refund_amount,
            "refund applied"
        );

        let receipt_path = self
            .issue_receipt(&payment, &order, &refund_amount, reason)
            .await;

        Ok(RefundOutcome {
            payment,
            order,
            refund_reference: response.refund_reference,
            refund_amount,
            receipt_path,
        })
    }

    async fn issue_receipt(
        &self,
        payment: &Payment,
        order: &Order,
        refund_amount: &BigDecimal,
        reason: &str,
    ) -> Option<String> {
        let receipts = self.receipts.as_ref()?;
        let user = match self.store.find_user_by_id(payment.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(payment_ref = %payment.payment_ref, "refund receipt skipped: user missing");
                return None;
            }
            Err(e) => {
                warn!(payment_ref = %payment.payment_ref, error = %e, "refund receipt skipped");
                return None;
            }
        };

        let path = match receipts
            .refund_receipt(&user, order, payment, refund_amount, reason)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!(payment_ref = %payment.payment_ref, error = %e, "refund receipt generation failed");
                return None;
            }
        };

        if let Some(email) = user.email.as_deref() {
            if let Err(e) = receipts.send_receipt_email(email, payment, &path).await {
                warn!(payment_ref = %payment.payment_ref, error = %e, "refund receipt email failed");
            }
        }
        Some(path)
    }
}

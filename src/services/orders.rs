//! Users and orders
//!
//! Orders are created here and advanced through fulfilment by operators.
//! Payment-driven transitions (`payment_confirmed`, refund cancellation) are
//! owned by the store's atomic confirmation and refund writes, not by this
//! service.

use bigdecimal::BigDecimal;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::info;

use crate::config::PaymentLimitsConfig;
use crate::database::error::DatabaseError;
use crate::database::models::{
    generate_order_ref, NewOrder, Order, OrderStatus, OrderStatusChange, Payment, User,
};
use crate::database::store::EntityStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::logging::mask_email;
use crate::services::payment_orchestrator::PaymentOrchestrator;

const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const DEFAULT_ORDER_LIST_LIMIT: i64 = 10;

#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error("invalid email address")]
    InvalidEmail,

    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("invalid currency code: {currency}")]
    InvalidCurrency { currency: String },

    #[error("user id must not be empty")]
    MissingUserId,

    #[error("order not found: {order_ref}")]
    OrderNotFound { order_ref: String },

    #[error("order {order_ref} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_ref: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<OrderServiceError> for AppError {
    fn from(err: OrderServiceError) -> Self {
        let kind = match err {
            OrderServiceError::InvalidEmail => AppErrorKind::Validation(ValidationError::InvalidField {
                field: "email".to_string(),
                reason: "not a valid email address".to_string(),
            }),
            OrderServiceError::InvalidAmount { amount, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason })
            }
            OrderServiceError::InvalidCurrency { currency } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "expected a 3-letter ISO code".to_string(),
                })
            }
            OrderServiceError::MissingUserId => {
                AppErrorKind::Validation(ValidationError::MissingField {
                    field: "user_id".to_string(),
                })
            }
            OrderServiceError::OrderNotFound { order_ref } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_ref })
            }
            OrderServiceError::InvalidStatusTransition { from, to, .. } => {
                AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            OrderServiceError::Storage(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type OrderServiceResult<T> = Result<T, OrderServiceError>;

/// An order together with every payment attempted against it
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<Payment>,
}

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

/// Drops control characters, trims, and caps the length. Empty input becomes `None`.
pub fn sanitize_description(description: &str) -> Option<String> {
    let cleaned: String = description
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_DESCRIPTION_CHARS).collect())
}

pub struct OrderService {
    store: Arc<dyn EntityStore>,
    limits: PaymentLimitsConfig,
}

impl OrderService {
    pub fn new(store: Arc<dyn EntityStore>, limits: PaymentLimitsConfig) -> Self {
        Self { store, limits }
    }

    pub fn default_currency(&self) -> &str {
        &self.limits.default_currency
    }

    pub async fn get_or_create_user(&self, external_id: &str) -> OrderServiceResult<User> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(OrderServiceError::MissingUserId);
        }
        Ok(self.store.get_or_create_user(external_id).await?)
    }

    pub async fn update_user_email(
        &self,
        external_id: &str,
        email: &str,
    ) -> OrderServiceResult<User> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(OrderServiceError::InvalidEmail);
        }
        self.get_or_create_user(external_id).await?;
        let user = self.store.update_user_email(external_id.trim(), email).await?;
        info!(user_id = user.id, email = %mask_email(email), "user email updated");
        Ok(user)
    }

    pub async fn create_order(
        &self,
        external_id: &str,
        amount: BigDecimal,
        currency: Option<&str>,
        description: Option<&str>,
    ) -> OrderServiceResult<Order> {
        self.validate_amount(&amount)?;
        let requested = currency.unwrap_or(self.limits.default_currency.as_str());
        let currency = PaymentOrchestrator::normalize_currency(requested).map_err(|_| {
            OrderServiceError::InvalidCurrency {
                currency: requested.to_string(),
            }
        })?;
        let user = self.get_or_create_user(external_id).await?;

        let order = self
            .store
            .insert_order(NewOrder {
                order_ref: generate_order_ref(),
                user_id: user.id,
                amount,
                currency,
                description: description.and_then(sanitize_description),
            })
            .await?;

        info!(
            order_ref = %order.order_ref,
            user_id = user.id,
            amount = %order.amount,
            currency = %order.currency,
            "order created"
        );
        Ok(order)
    }

    pub async fn find_order(&self, order_ref: &str) -> OrderServiceResult<OrderDetails> {
        let order = self
            .store
            .find_order(order_ref)
            .await?
            .ok_or_else(|| OrderServiceError::OrderNotFound {
                order_ref: order_ref.to_string(),
            })?;
        let payments = self.store.list_order_payments(order.id).await?;
        Ok(OrderDetails { order, payments })
    }

    /// Most recent first. An unknown user simply has no orders.
    pub async fn list_user_orders(
        &self,
        external_id: &str,
        limit: i64,
    ) -> OrderServiceResult<Vec<Order>> {
        match self.store.find_user_by_external_id(external_id.trim()).await? {
            Some(user) => Ok(self.store.list_user_orders(user.id, limit.max(1)).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn update_order_status(
        &self,
        order_ref: &str,
        target: OrderStatus,
    ) -> OrderServiceResult<Order> {
        match self.store.update_order_status(order_ref, target).await {
            Ok(OrderStatusChange::Applied(order)) => {
                info!(order_ref = %order.order_ref, status = %order.status, "order status updated");
                Ok(order)
            }
            Ok(OrderStatusChange::Rejected { current }) => {
                Err(OrderServiceError::InvalidStatusTransition {
                    order_ref: order_ref.to_string(),
                    from: current,
                    to: target,
                })
            }
            Err(e) if e.is_not_found() => Err(OrderServiceError::OrderNotFound {
                order_ref: order_ref.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn validate_amount(&self, amount: &BigDecimal) -> OrderServiceResult<()> {
        if *amount < self.limits.min_amount || *amount > self.limits.max_amount {
            return Err(OrderServiceError::InvalidAmount {
                amount: amount.to_string(),
                reason: format!(
                    "must be between {} and {}",
                    self.limits.min_amount, self.limits.max_amount
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryEntityStore;
    use std::str::FromStr;

    fn service() -> OrderService {
        OrderService::new(
            Arc::new(InMemoryEntityStore::new()),
            PaymentLimitsConfig::default(),
        )
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("buyer@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
        assert!(!is_valid_email("buyer@"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@b.c"));
    }

    #[test]
    fn description_is_sanitized() {
        assert_eq!(
            sanitize_description("  two\u{0007} widgets \u{0000} "),
            Some("two widgets".to_string())
        );
        assert_eq!(sanitize_description(" \t "), None);
        let long = "x".repeat(1500);
        assert_eq!(sanitize_description(&long).map(|d| d.len()), Some(1000));
    }

    #[tokio::test]
    async fn create_order_defaults_currency_and_starts_pending() {
        let service = service();
        let order = service
            .create_order("tg-1", BigDecimal::from(50), None, Some("Widgets"))
            .await
            .unwrap();

        assert!(order.order_ref.starts_with("ORD-"));
        assert_eq!(order.currency, "USD");
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.description.as_deref(), Some("Widgets"));

        let lowercase = service
            .create_order("tg-1", BigDecimal::from(5), Some("eur"), None)
            .await
            .unwrap();
        assert_eq!(lowercase.currency, "EUR");
    }

    #[tokio::test]
    async fn create_order_rejects_out_of_bounds_amounts_and_bad_currency() {
        let service = service();

        let err = service
            .create_order("tg-1", BigDecimal::from_str("0.50").unwrap(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::InvalidAmount { .. }));

        let err = service
            .create_order("tg-1", BigDecimal::from(10_001), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::InvalidAmount { .. }));

        let err = service
            .create_order("tg-1", BigDecimal::from(10), Some("US"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::InvalidCurrency { .. }));
    }

    #[tokio::test]
    async fn fulfilment_only_moves_forward() {
        let service = service();
        let order = service
            .create_order("tg-2", BigDecimal::from(20), None, None)
            .await
            .unwrap();

        // unpaid orders cannot start processing
        let err = service
            .update_order_status(&order.order_ref, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderServiceError::InvalidStatusTransition {
                from: OrderStatus::PendingPayment,
                ..
            }
        ));

        let cancelled = service
            .update_order_status(&order.order_ref, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = service
            .update_order_status("ORD-missing", OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::OrderNotFound { .. }));
    }

    #[tokio::test]
    async fn find_and_list_orders() {
        let service = service();
        let first = service
            .create_order("tg-3", BigDecimal::from(10), None, None)
            .await
            .unwrap();
        service
            .create_order("tg-3", BigDecimal::from(11), None, None)
            .await
            .unwrap();

        let details = service.find_order(&first.order_ref).await.unwrap();
        assert_eq!(details.order.id, first.id);
        assert!(details.payments.is_empty());

        assert_eq!(service.list_user_orders("tg-3", 10).await.unwrap().len(), 2);
        assert!(service.list_user_orders("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_update_validates_first() {
        let service = service();
        assert!(matches!(
            service.update_user_email("tg-4", "nope").await,
            Err(OrderServiceError::InvalidEmail)
        ));
        let user = service
            .update_user_email("tg-4", "buyer@example.com")
            .await
            .unwrap();
        assert_eq!(user.email.as_deref(), Some("buyer@example.com"));
    }
}

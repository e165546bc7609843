use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::database::error::DatabaseResult;
use crate::database::models::{
    ConfirmationOutcome, ConfirmationResult, InitiationRecord, NewOrder, NewPayment,
    NewSupportTicket, Order, OrderStatus, OrderStatusChange, Payment, RefundApplication,
    SupportTicket, TicketStatus, TicketStatusChange, User,
};
use crate::payments::types::ProviderName;

/// Persistence for users, orders, payments and support tickets.
///
/// The `record_*`/`apply_*`/`update_order_status` methods are read-modify-write
/// operations that each run atomically against the entities they touch. They
/// always lock a payment before its order. Callers never hold a store
/// transaction across a provider call.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_or_create_user(&self, external_id: &str) -> DatabaseResult<User>;

    async fn find_user_by_id(&self, user_id: i64) -> DatabaseResult<Option<User>>;

    async fn find_user_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<User>>;

    /// Fails with `NotFound` when the user has never interacted.
    async fn update_user_email(&self, external_id: &str, email: &str) -> DatabaseResult<User>;

    /// Fails with `ForeignKeyViolation` when the user does not exist.
    async fn insert_order(&self, order: NewOrder) -> DatabaseResult<Order>;

    async fn find_order(&self, order_ref: &str) -> DatabaseResult<Option<Order>>;

    async fn find_order_by_id(&self, order_id: i64) -> DatabaseResult<Option<Order>>;

    async fn list_user_orders(&self, user_id: i64, limit: i64) -> DatabaseResult<Vec<Order>>;

    /// Applies an operator-requested status change if `OrderStatus::can_advance_to` allows it.
    async fn update_order_status(
        &self,
        order_ref: &str,
        target: OrderStatus,
    ) -> DatabaseResult<OrderStatusChange>;

    /// Inserts a `pending` payment. The order and user must exist and match.
    async fn insert_payment(&self, payment: NewPayment) -> DatabaseResult<Payment>;

    async fn find_payment(&self, payment_ref: &str) -> DatabaseResult<Option<Payment>>;

    async fn find_payment_by_provider_ref(
        &self,
        provider: ProviderName,
        provider_reference: &str,
    ) -> DatabaseResult<Option<Payment>>;

    async fn list_order_payments(&self, order_id: i64) -> DatabaseResult<Vec<Payment>>;

    /// Pending payments of `providers` that carry a provider reference and were
    /// created before `created_before`, oldest first.
    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        providers: &[ProviderName],
        limit: i64,
    ) -> DatabaseResult<Vec<Payment>>;

    /// Records the outcome of the provider `initiate` call. Status and response
    /// are written together. A payment that already left `pending` keeps its status.
    async fn record_initiation(
        &self,
        payment_ref: &str,
        record: InitiationRecord,
    ) -> DatabaseResult<Payment>;

    /// Applies a confirmation to the payment and its order in one transaction.
    async fn apply_confirmation(
        &self,
        provider: ProviderName,
        provider_reference: &str,
        outcome: ConfirmationOutcome,
        raw_payload: JsonValue,
    ) -> DatabaseResult<ConfirmationResult>;

    /// Marks a completed payment refunded and cancels its order in one transaction.
    async fn apply_refund(
        &self,
        payment_ref: &str,
        refund_record: JsonValue,
    ) -> DatabaseResult<RefundApplication>;

    /// Fails with `ForeignKeyViolation` when the user does not exist.
    async fn insert_ticket(&self, ticket: NewSupportTicket) -> DatabaseResult<SupportTicket>;

    async fn find_ticket(&self, ticket_ref: &str) -> DatabaseResult<Option<SupportTicket>>;

    /// Applies the change if `TicketStatus::can_advance_to` allows it.
    async fn update_ticket_status(
        &self,
        ticket_ref: &str,
        target: TicketStatus,
    ) -> DatabaseResult<TicketStatusChange>;

    async fn health_check(&self) -> DatabaseResult<()>;
}

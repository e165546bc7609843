//! Postgres-backed [`EntityStore`]
//!
//! Multi-entity writes run in a single transaction and take row locks with
//! `SELECT ... FOR UPDATE`, payment first and order second.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DatabaseResult};
use crate::database::models::{
    merge_refund_response, ConfirmationDecision, ConfirmationOutcome, ConfirmationResult,
    InitiationRecord, NewOrder, NewPayment, NewSupportTicket, Order, OrderStatus,
    OrderStatusChange, Payment, PaymentStatus, RefundApplication, SupportTicket, TicketStatus,
    TicketStatusChange, User,
};
use crate::database::store::EntityStore;
use crate::payments::types::ProviderName;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const USER_COLUMNS: &str = "id, external_id, email, is_active, created_at, updated_at";
const ORDER_COLUMNS: &str =
    "id, order_ref, user_id, amount, currency, description, status, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, payment_ref, order_id, user_id, amount, currency, provider, \
     provider_reference, status, gateway_response, created_at, updated_at";
const TICKET_COLUMNS: &str =
    "id, ticket_ref, user_id, subject, description, priority, status, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    external_id: String,
    email: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            external_id: row.external_id,
            email: row.email,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    order_ref: String,
    user_id: i64,
    amount: BigDecimal,
    currency: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            status: row.status.parse().map_err(DatabaseError::corrupt)?,
            id: row.id,
            order_ref: row.order_ref,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    payment_ref: String,
    order_id: i64,
    user_id: i64,
    amount: BigDecimal,
    currency: String,
    provider: String,
    provider_reference: Option<String>,
    status: String,
    gateway_response: Option<JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            provider: row
                .provider
                .parse()
                .map_err(|e: crate::payments::types::ParseProviderError| {
                    DatabaseError::corrupt(e.to_string())
                })?,
            status: row.status.parse().map_err(DatabaseError::corrupt)?,
            id: row.id,
            payment_ref: row.payment_ref,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            provider_reference: row.provider_reference,
            gateway_response: row.gateway_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: i64,
    ticket_ref: String,
    user_id: i64,
    subject: String,
    description: String,
    priority: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for SupportTicket {
    type Error = DatabaseError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(SupportTicket {
            priority: row.priority.parse().map_err(DatabaseError::corrupt)?,
            status: row.status.parse().map_err(DatabaseError::corrupt)?,
            id: row.id,
            ticket_ref: row.ticket_ref,
            user_id: row.user_id,
            subject: row.subject,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn payments_from_rows(rows: Vec<PaymentRow>) -> DatabaseResult<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

fn orders_from_rows(rows: Vec<OrderRow>) -> DatabaseResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled schema. Every statement is idempotent.
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        debug!("Database schema ensured");
        Ok(())
    }

    async fn lock_payment_by_ref(
        tx: &mut Transaction<'_, Postgres>,
        payment_ref: &str,
    ) -> DatabaseResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE payment_ref = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_ref)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn lock_order_by_id(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
    ) -> DatabaseResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("order", order_id.to_string()))?;
        Order::try_from(row)
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get_or_create_user(&self, external_id: &str) -> DatabaseResult<User> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (external_id) VALUES ($1)
             ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into())
    }

    async fn find_user_by_id(&self, user_id: i64) -> DatabaseResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE external_id = $1",
            USER_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(User::from))
    }

    async fn update_user_email(&self, external_id: &str, email: &str) -> DatabaseResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET email = $2, updated_at = NOW()
             WHERE external_id = $1
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(external_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("user", external_id))?;
        Ok(row.into())
    }

    async fn insert_order(&self, order: NewOrder) -> DatabaseResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_ref, user_id, amount, currency, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(&order.order_ref)
        .bind(order.user_id)
        .bind(&order.amount)
        .bind(&order.currency)
        .bind(&order.description)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Order::try_from(row)
    }

    async fn find_order(&self, order_ref: &str) -> DatabaseResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_ref = $1",
            ORDER_COLUMNS
        ))
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Order::try_from).transpose()
    }

    async fn find_order_by_id(&self, order_id: i64) -> DatabaseResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Order::try_from).transpose()
    }

    async fn list_user_orders(&self, user_id: i64, limit: i64) -> DatabaseResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        orders_from_rows(rows)
    }

    async fn update_order_status(
        &self,
        order_ref: &str,
        target: OrderStatus,
    ) -> DatabaseResult<OrderStatusChange> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_ref = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("order", order_ref))?;
        let current = Order::try_from(row)?;

        if !current.status.can_advance_to(target) {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(OrderStatusChange::Rejected {
                current: current.status,
            });
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(current.id)
        .bind(target.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(OrderStatusChange::Applied(Order::try_from(row)?))
    }

    async fn insert_payment(&self, payment: NewPayment) -> DatabaseResult<Payment> {
        // Selecting through orders ties the payment owner to the order owner
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments (payment_ref, order_id, user_id, amount, currency, provider)
             SELECT $1, o.id, o.user_id, $4, $5, $6 FROM orders o
             WHERE o.id = $2 AND o.user_id = $3
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.payment_ref)
        .bind(payment.order_id)
        .bind(payment.user_id)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(payment.provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "payments_order_id_fkey".to_string(),
            })
        })?;
        Payment::try_from(row)
    }

    async fn find_payment(&self, payment_ref: &str) -> DatabaseResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE payment_ref = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_provider_ref(
        &self,
        provider: ProviderName,
        provider_reference: &str,
    ) -> DatabaseResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_reference = $2",
            PAYMENT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_order_payments(&self, order_id: i64) -> DatabaseResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY id ASC",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        payments_from_rows(rows)
    }

    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        providers: &[ProviderName],
        limit: i64,
    ) -> DatabaseResult<Vec<Payment>> {
        let providers: Vec<String> = providers.iter().map(|p| p.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE status = 'pending' AND created_at < $1
               AND provider_reference IS NOT NULL
               AND provider = ANY($2)
             ORDER BY created_at ASC, id ASC
             LIMIT $3",
            PAYMENT_COLUMNS
        ))
        .bind(created_before)
        .bind(providers)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        payments_from_rows(rows)
    }

    async fn record_initiation(
        &self,
        payment_ref: &str,
        record: InitiationRecord,
    ) -> DatabaseResult<Payment> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let current = Self::lock_payment_by_ref(&mut tx, payment_ref)
            .await?
            .ok_or_else(|| DatabaseError::not_found("payment", payment_ref))?;
        let still_pending = current.status == PaymentStatus::Pending;

        let (status, provider_reference, response) = match record {
            InitiationRecord::Accepted {
                provider_reference,
                response,
            } => (
                current.status,
                current.provider_reference.clone().or(Some(provider_reference)),
                response,
            ),
            InitiationRecord::Failed { response } => {
                let status = if still_pending {
                    PaymentStatus::Failed
                } else {
                    current.status
                };
                (status, current.provider_reference.clone(), response)
            }
            InitiationRecord::Inconclusive { response } => {
                (current.status, current.provider_reference.clone(), response)
            }
        };
        let response = if still_pending {
            Some(response)
        } else {
            current.gateway_response.clone()
        };

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $2, provider_reference = $3, gateway_response = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(current.id)
        .bind(status.as_str())
        .bind(provider_reference)
        .bind(response)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Payment::try_from(row)
    }

    async fn apply_confirmation(
        &self,
        provider: ProviderName,
        provider_reference: &str,
        outcome: ConfirmationOutcome,
        raw_payload: JsonValue,
    ) -> DatabaseResult<ConfirmationResult> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE provider = $1 AND provider_reference = $2
             FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(ConfirmationResult::UnknownTransaction);
        };
        let current = Payment::try_from(row)?;
        let previous_status = current.status;

        let target = match previous_status.decide(outcome) {
            ConfirmationDecision::Apply(target) => target,
            ConfirmationDecision::Replay => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(ConfirmationResult::Replayed { payment: current });
            }
            ConfirmationDecision::Stale | ConfirmationDecision::NoChange => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(ConfirmationResult::Ignored { payment: current });
            }
        };

        let order = Self::lock_order_by_id(&mut tx, current.order_id).await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = $2, gateway_response = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(current.id)
        .bind(target.as_str())
        .bind(&raw_payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        let payment = Payment::try_from(row)?;

        let mut confirmed_order = None;
        if target == PaymentStatus::Completed && order.status == OrderStatus::PendingPayment {
            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
                ORDER_COLUMNS
            ))
            .bind(order.id)
            .bind(OrderStatus::PaymentConfirmed.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            confirmed_order = Some(Order::try_from(row)?);
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(ConfirmationResult::Applied {
            payment,
            previous_status,
            order: confirmed_order,
        })
    }

    async fn apply_refund(
        &self,
        payment_ref: &str,
        refund_record: JsonValue,
    ) -> DatabaseResult<RefundApplication> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let current = Self::lock_payment_by_ref(&mut tx, payment_ref)
            .await?
            .ok_or_else(|| DatabaseError::not_found("payment", payment_ref))?;

        if current.status != PaymentStatus::Completed {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(RefundApplication::NotRefundable {
                status: current.status,
            });
        }

        let order = Self::lock_order_by_id(&mut tx, current.order_id).await?;
        let merged = merge_refund_response(current.gateway_response.as_ref(), refund_record);

        let payment_row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = $2, gateway_response = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(current.id)
        .bind(PaymentStatus::Refunded.as_str())
        .bind(&merged)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.id)
        .bind(OrderStatus::Cancelled.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(RefundApplication::Applied {
            payment: Payment::try_from(payment_row)?,
            order: Order::try_from(order_row)?,
        })
    }

    async fn insert_ticket(&self, ticket: NewSupportTicket) -> DatabaseResult<SupportTicket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "INSERT INTO support_tickets (ticket_ref, user_id, subject, description, priority)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            TICKET_COLUMNS
        ))
        .bind(&ticket.ticket_ref)
        .bind(ticket.user_id)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.priority.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        SupportTicket::try_from(row)
    }

    async fn find_ticket(&self, ticket_ref: &str) -> DatabaseResult<Option<SupportTicket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM support_tickets WHERE ticket_ref = $1",
            TICKET_COLUMNS
        ))
        .bind(ticket_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(SupportTicket::try_from).transpose()
    }

    async fn update_ticket_status(
        &self,
        ticket_ref: &str,
        target: TicketStatus,
    ) -> DatabaseResult<TicketStatusChange> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM support_tickets WHERE ticket_ref = $1 FOR UPDATE",
            TICKET_COLUMNS
        ))
        .bind(ticket_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("support_ticket", ticket_ref))?;
        let current = SupportTicket::try_from(row)?;

        if !current.status.can_advance_to(target) {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(TicketStatusChange::Rejected {
                current: current.status,
            });
        }

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "UPDATE support_tickets SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            TICKET_COLUMNS
        ))
        .bind(current.id)
        .bind(target.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(TicketStatusChange::Applied(SupportTicket::try_from(row)?))
    }

    async fn health_check(&self) -> DatabaseResult<()> {
        super::health_check(&self.pool).await
    }
}

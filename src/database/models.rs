//! Stored entities and their status machines.
//!
//! Both stores share the transition rules defined here, so a confirmation or
//! refund is decided the same way whether it runs against Postgres or memory.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payments::types::ProviderName;

/// Builds `PREFIX-YYYYmmddHHMMSS-xxxxxxxx` references for orders and payments.
pub fn generate_reference(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, timestamp, &suffix[..8])
}

pub fn generate_order_ref() -> String {
    generate_reference("ORD")
}

pub fn generate_payment_ref() -> String {
    generate_reference("PAY")
}

pub fn generate_ticket_ref() -> String {
    generate_reference("TKT")
}

// ============================================================================
// Status machines
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    PaymentConfirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Transitions an operator may request directly. Cancelling a paid order
    /// goes through a refund instead.
    pub fn can_advance_to(&self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (OrderStatus::PendingPayment, OrderStatus::Cancelled)
                | (OrderStatus::PaymentConfirmed, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "payment_confirmed" => Ok(OrderStatus::PaymentConfirmed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }

    /// Decides what a confirmation outcome does to a payment in this status.
    ///
    /// A `failed` payment may still be completed by a late success, since the
    /// provider captured the funds; nothing ever leaves `completed` or
    /// `refunded` through a confirmation.
    pub fn decide(&self, outcome: ConfirmationOutcome) -> ConfirmationDecision {
        use ConfirmationDecision::*;
        use ConfirmationOutcome as O;

        match (self, outcome) {
            (PaymentStatus::Pending, O::Succeeded) => Apply(PaymentStatus::Completed),
            (PaymentStatus::Pending, O::Failed) => Apply(PaymentStatus::Failed),
            (PaymentStatus::Pending, O::Pending) => NoChange,
            (PaymentStatus::Failed, O::Succeeded) => Apply(PaymentStatus::Completed),
            (PaymentStatus::Failed, O::Failed) => Replay,
            (PaymentStatus::Failed, O::Pending) => Stale,
            (PaymentStatus::Completed, O::Succeeded) => Replay,
            (PaymentStatus::Completed, _) => Stale,
            (PaymentStatus::Refunded, _) => Replay,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    /// Closed is final. A resolved ticket may be reopened into `in_progress`.
    pub fn can_advance_to(&self, target: TicketStatus) -> bool {
        matches!(
            (self, target),
            (TicketStatus::Open, TicketStatus::InProgress)
                | (TicketStatus::Open, TicketStatus::Resolved)
                | (TicketStatus::Open, TicketStatus::Closed)
                | (TicketStatus::InProgress, TicketStatus::Resolved)
                | (TicketStatus::InProgress, TicketStatus::Closed)
                | (TicketStatus::Resolved, TicketStatus::InProgress)
                | (TicketStatus::Resolved, TicketStatus::Closed)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(TicketPriority::Low),
            "medium" => Ok(TicketPriority::Medium),
            "high" => Ok(TicketPriority::High),
            "urgent" => Ok(TicketPriority::Urgent),
            other => Err(format!("unknown ticket priority: {}", other)),
        }
    }
}

/// Provider-agnostic result carried by a callback or status poll
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Succeeded,
    Failed,
    /// Non-terminal progress report (e.g. invoice paid but unconfirmed)
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Apply(PaymentStatus),
    /// Already at (or past) the reported outcome
    Replay,
    /// Out-of-order report older than the stored status
    Stale,
    /// Non-terminal report on a pending payment
    NoChange,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub external_id: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub order_ref: String,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub payment_ref: String,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderName,
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    pub gateway_response: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupportTicket {
    pub id: i64,
    pub ticket_ref: String,
    pub user_id: i64,
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSupportTicket {
    pub ticket_ref: String,
    pub user_id: i64,
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_ref: String,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_ref: String,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderName,
}

// ============================================================================
// Atomic operation inputs and results
// ============================================================================

/// Result of the adapter `initiate` call, recorded in the dispatch's second write
#[derive(Debug, Clone)]
pub enum InitiationRecord {
    Accepted {
        provider_reference: String,
        response: JsonValue,
    },
    /// Provider refused or could not be used; the payment becomes `failed`
    Failed { response: JsonValue },
    /// Transport failure; the provider-side outcome is unknown so the payment stays `pending`
    Inconclusive { response: JsonValue },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConfirmationResult {
    Applied {
        payment: Payment,
        previous_status: PaymentStatus,
        /// Set when the owning order moved to `payment_confirmed`
        order: Option<Order>,
    },
    /// Duplicate delivery; nothing written
    Replayed { payment: Payment },
    /// Stale or non-terminal delivery; nothing written
    Ignored { payment: Payment },
    UnknownTransaction,
}

impl ConfirmationResult {
    pub fn payment(&self) -> Option<&Payment> {
        match self {
            ConfirmationResult::Applied { payment, .. }
            | ConfirmationResult::Replayed { payment }
            | ConfirmationResult::Ignored { payment } => Some(payment),
            ConfirmationResult::UnknownTransaction => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationResult::Applied { .. } => "applied",
            ConfirmationResult::Replayed { .. } => "replayed",
            ConfirmationResult::Ignored { .. } => "ignored",
            ConfirmationResult::UnknownTransaction => "unknown_transaction",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefundApplication {
    Applied { payment: Payment, order: Order },
    NotRefundable { status: PaymentStatus },
}

#[derive(Debug, Clone)]
pub enum OrderStatusChange {
    Applied(Order),
    Rejected { current: OrderStatus },
}

#[derive(Debug, Clone)]
pub enum TicketStatusChange {
    Applied(SupportTicket),
    Rejected { current: TicketStatus },
}

/// Keeps the settlement payload next to the refund record so the audit trail survives.
pub fn merge_refund_response(previous: Option<&JsonValue>, refund: JsonValue) -> JsonValue {
    serde_json::json!({
        "refund": refund,
        "settlement": previous.cloned().unwrap_or(JsonValue::Null),
    })
}

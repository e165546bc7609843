use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DatabaseResult};
use crate::database::models::{
    merge_refund_response, ConfirmationDecision, ConfirmationOutcome, ConfirmationResult,
    InitiationRecord, NewOrder, NewPayment, NewSupportTicket, Order, OrderStatus,
    OrderStatusChange, Payment, PaymentStatus, RefundApplication, SupportTicket, TicketStatus,
    TicketStatusChange, User,
};
use crate::database::store::EntityStore;
use crate::payments::types::ProviderName;

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    users_by_external_id: HashMap<String, i64>,
    orders: HashMap<i64, Order>,
    orders_by_ref: HashMap<String, i64>,
    payments: HashMap<i64, Payment>,
    payments_by_ref: HashMap<String, i64>,
    payments_by_provider_ref: HashMap<(ProviderName, String), i64>,
    tickets: HashMap<String, SupportTicket>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn payment_id(&self, payment_ref: &str) -> DatabaseResult<i64> {
        self.payments_by_ref
            .get(payment_ref)
            .copied()
            .ok_or_else(|| DatabaseError::not_found("payment", payment_ref))
    }
}

/// Process-local store used by tests and by deployments without `DATABASE_URL`.
///
/// Every write takes the table lock for its whole read-modify-write. No
/// provider I/O happens under the lock, so callers never wait on the network.
#[derive(Default, Clone)]
pub struct InMemoryEntityStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_or_create_user(&self, external_id: &str) -> DatabaseResult<User> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.users_by_external_id.get(external_id) {
            if let Some(user) = tables.users.get(id) {
                return Ok(user.clone());
            }
        }

        let id = tables.next_id();
        let now = Utc::now();
        let user = User {
            id,
            external_id: external_id.to_string(),
            email: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(id, user.clone());
        tables
            .users_by_external_id
            .insert(external_id.to_string(), id);
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: i64) -> DatabaseResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users_by_external_id
            .get(external_id)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn update_user_email(&self, external_id: &str, email: &str) -> DatabaseResult<User> {
        let mut tables = self.tables.write().await;
        let id = *tables
            .users_by_external_id
            .get(external_id)
            .ok_or_else(|| DatabaseError::not_found("user", external_id))?;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("user", external_id))?;
        user.email = Some(email.to_string());
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn insert_order(&self, order: NewOrder) -> DatabaseResult<Order> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&order.user_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "orders_user_id_fkey".to_string(),
            }));
        }
        if tables.orders_by_ref.contains_key(&order.order_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "orders_order_ref_key".to_string(),
            }));
        }

        let id = tables.next_id();
        let now = Utc::now();
        let stored = Order {
            id,
            order_ref: order.order_ref,
            user_id: order.user_id,
            amount: order.amount,
            currency: order.currency,
            description: order.description,
            status: OrderStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        };
        tables.orders_by_ref.insert(stored.order_ref.clone(), id);
        tables.orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_order(&self, order_ref: &str) -> DatabaseResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders_by_ref
            .get(order_ref)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn find_order_by_id(&self, order_id: i64) -> DatabaseResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn list_user_orders(&self, user_id: i64, limit: i64) -> DatabaseResult<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_ref: &str,
        target: OrderStatus,
    ) -> DatabaseResult<OrderStatusChange> {
        let mut tables = self.tables.write().await;
        let id = *tables
            .orders_by_ref
            .get(order_ref)
            .ok_or_else(|| DatabaseError::not_found("order", order_ref))?;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("order", order_ref))?;
        if !order.status.can_advance_to(target) {
            return Ok(OrderStatusChange::Rejected {
                current: order.status,
            });
        }
        order.status = target;
        order.updated_at = Utc::now();
        Ok(OrderStatusChange::Applied(order.clone()))
    }

    async fn insert_payment(&self, payment: NewPayment) -> DatabaseResult<Payment> {
        let mut tables = self.tables.write().await;
        let owner_matches = tables
            .orders
            .get(&payment.order_id)
            .map(|o| o.user_id == payment.user_id)
            .unwrap_or(false);
        if !owner_matches || !tables.users.contains_key(&payment.user_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "payments_order_id_fkey".to_string(),
            }));
        }
        if tables.payments_by_ref.contains_key(&payment.payment_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_payment_ref_key".to_string(),
            }));
        }

        let id = tables.next_id();
        let now = Utc::now();
        let stored = Payment {
            id,
            payment_ref: payment.payment_ref,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            currency: payment.currency,
            provider: payment.provider,
            provider_reference: None,
            status: PaymentStatus::Pending,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };
        tables.payments_by_ref.insert(stored.payment_ref.clone(), id);
        tables.payments.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_payment(&self, payment_ref: &str) -> DatabaseResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments_by_ref
            .get(payment_ref)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn find_payment_by_provider_ref(
        &self,
        provider: ProviderName,
        provider_reference: &str,
    ) -> DatabaseResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments_by_provider_ref
            .get(&(provider, provider_reference.to_string()))
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn list_order_payments(&self, order_id: i64) -> DatabaseResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        providers: &[ProviderName],
        limit: i64,
    ) -> DatabaseResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.created_at < created_before
                    && p.provider_reference.is_some()
                    && providers.contains(&p.provider)
            })
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn record_initiation(
        &self,
        payment_ref: &str,
        record: InitiationRecord,
    ) -> DatabaseResult<Payment> {
        let mut tables = self.tables.write().await;
        let id = tables.payment_id(payment_ref)?;

        if let InitiationRecord::Accepted {
            provider_reference, ..
        } = &record
        {
            let key = (
                tables.payments[&id].provider,
                provider_reference.clone(),
            );
            let existing = tables.payments_by_provider_ref.get(&key).copied();
            match existing {
                Some(existing) if existing != id => {
                    return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                        constraint: "payments_provider_reference_key".to_string(),
                    }));
                }
                _ => {
                    tables.payments_by_provider_ref.insert(key, id);
                }
            }
        }

        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("payment", payment_ref))?;
        let still_pending = payment.status == PaymentStatus::Pending;
        match record {
            InitiationRecord::Accepted {
                provider_reference,
                response,
            } => {
                if payment.provider_reference.is_none() {
                    payment.provider_reference = Some(provider_reference);
                }
                if still_pending {
                    payment.gateway_response = Some(response);
                }
            }
            InitiationRecord::Failed { response } => {
                if still_pending {
                    payment.status = PaymentStatus::Failed;
                    payment.gateway_response = Some(response);
                }
            }
            InitiationRecord::Inconclusive { response } => {
                if still_pending {
                    payment.gateway_response = Some(response);
                }
            }
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn apply_confirmation(
        &self,
        provider: ProviderName,
        provider_reference: &str,
        outcome: ConfirmationOutcome,
        raw_payload: JsonValue,
    ) -> DatabaseResult<ConfirmationResult> {
        let mut tables = self.tables.write().await;
        let Some(id) = tables
            .payments_by_provider_ref
            .get(&(provider, provider_reference.to_string()))
            .copied()
        else {
            return Ok(ConfirmationResult::UnknownTransaction);
        };

        let now = Utc::now();
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("payment", provider_reference))?;
        let previous_status = payment.status;

        let target = match previous_status.decide(outcome) {
            ConfirmationDecision::Apply(target) => target,
            ConfirmationDecision::Replay => {
                return Ok(ConfirmationResult::Replayed {
                    payment: payment.clone(),
                })
            }
            ConfirmationDecision::Stale | ConfirmationDecision::NoChange => {
                return Ok(ConfirmationResult::Ignored {
                    payment: payment.clone(),
                })
            }
        };

        payment.status = target;
        payment.gateway_response = Some(raw_payload);
        payment.updated_at = now;
        let payment = payment.clone();

        let mut confirmed_order = None;
        if target == PaymentStatus::Completed {
            if let Some(order) = tables.orders.get_mut(&payment.order_id) {
                if order.status == OrderStatus::PendingPayment {
                    order.status = OrderStatus::PaymentConfirmed;
                    order.updated_at = now;
                    confirmed_order = Some(order.clone());
                }
            }
        }

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
        let mut tables = self.tables.write().await;
        let id = tables.payment_id(payment_ref)?;
        let order_id = {
            let payment = &tables.payments[&id];
            if payment.status != PaymentStatus::Completed {
                return Ok(RefundApplication::NotRefundable {
                    status: payment.status,
                });
            }
            payment.order_id
        };
        if !tables.orders.contains_key(&order_id) {
            return Err(DatabaseError::not_found("order", order_id.to_string()));
        }

        let now = Utc::now();
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("payment", payment_ref))?;
        payment.status = PaymentStatus::Refunded;
        payment.gateway_response = Some(merge_refund_response(
            payment.gateway_response.as_ref(),
            refund_record,
        ));
        payment.updated_at = now;
        let payment = payment.clone();

        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id.to_string()))?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;

        Ok(RefundApplication::Applied {
            payment,
            order: order.clone(),
        })
    }

    async fn insert_ticket(&self, ticket: NewSupportTicket) -> DatabaseResult<SupportTicket> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&ticket.user_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "support_tickets_user_id_fkey".to_string(),
            }));
        }
        if tables.tickets.contains_key(&ticket.ticket_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "support_tickets_ticket_ref_key".to_string(),
            }));
        }

        let id = tables.next_id();
        let now = Utc::now();
        let ticket = SupportTicket {
            id,
            ticket_ref: ticket.ticket_ref,
            user_id: ticket.user_id,
            subject: ticket.subject,
            description: ticket.description,
            priority: ticket.priority,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
        };
        tables
            .tickets
            .insert(ticket.ticket_ref.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn find_ticket(&self, ticket_ref: &str) -> DatabaseResult<Option<SupportTicket>> {
        let tables = self.tables.read().await;
        Ok(tables.tickets.get(ticket_ref).cloned())
    }

    async fn update_ticket_status(
        &self,
        ticket_ref: &str,
        target: TicketStatus,
    ) -> DatabaseResult<TicketStatusChange> {
        let mut tables = self.tables.write().await;
        let ticket = tables
            .tickets
            .get_mut(ticket_ref)
            .ok_or_else(|| DatabaseError::not_found("support_ticket", ticket_ref))?;
        if !ticket.status.can_advance_to(target) {
            return Ok(TicketStatusChange::Rejected {
                current: ticket.status,
            });
        }
        ticket.status = target;
        ticket.updated_at = Utc::now();
        Ok(TicketStatusChange::Applied(ticket.clone()))
    }

    async fn health_check(&self) -> DatabaseResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    async fn seed(store: &InMemoryEntityStore) -> (User, Order, Payment) {
        let user = store.get_or_create_user("tg-42").await.unwrap();
        let order = store
            .insert_order(NewOrder {
                order_ref: "ORD-1".to_string(),
                user_id: user.id,
                amount: BigDecimal::from(50),
                currency: "USD".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let payment = store
            .insert_payment(NewPayment {
                payment_ref: "PAY-1".to_string(),
                order_id: order.id,
                user_id: user.id,
                amount: BigDecimal::from(50),
                currency: "USD".to_string(),
                provider: ProviderName::Cardnet,
            })
            .await
            .unwrap();
        (user, order, payment)
    }

    #[tokio::test]
    async fn get_or_create_user_is_idempotent() {
        let store = InMemoryEntityStore::new();
        let first = store.get_or_create_user("tg-1").await.unwrap();
        let second = store.get_or_create_user("tg-1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_active);
    }

    #[tokio::test]
    async fn orders_require_an_existing_user() {
        let store = InMemoryEntityStore::new();
        let err = store
            .insert_order(NewOrder {
                order_ref: "ORD-X".to_string(),
                user_id: 999,
                amount: BigDecimal::from(10),
                currency: "USD".to_string(),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            DatabaseErrorKind::ForeignKeyViolation { .. }
        ));
    }

    #[tokio::test]
    async fn payment_owner_must_match_order_owner() {
        let store = InMemoryEntityStore::new();
        let (_, order, _) = seed(&store).await;
        let other = store.get_or_create_user("tg-other").await.unwrap();
        let err = store
            .insert_payment(NewPayment {
                payment_ref: "PAY-2".to_string(),
                order_id: order.id,
                user_id: other.id,
                amount: BigDecimal::from(50),
                currency: "USD".to_string(),
                provider: ProviderName::Cardnet,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            DatabaseErrorKind::ForeignKeyViolation { .. }
        ));
    }

    #[tokio::test]
    async fn confirmation_completes_payment_and_order_together() {
        let store = InMemoryEntityStore::new();
        let (_, order, payment) = seed(&store).await;
        store
            .record_initiation(
                &payment.payment_ref,
                InitiationRecord::Accepted {
                    provider_reference: "pi_1".to_string(),
                    response: json!({"id": "pi_1"}),
                },
            )
            .await
            .unwrap();

        let result = store
            .apply_confirmation(
                ProviderName::Cardnet,
                "pi_1",
                ConfirmationOutcome::Succeeded,
                json!({"type": "payment_intent.succeeded"}),
            )
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Applied { order: Some(_), .. }));

        let order = store.find_order(&order.order_ref).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PaymentConfirmed);
    }

    #[tokio::test]
    async fn unknown_provider_reference_is_reported_not_raised() {
        let store = InMemoryEntityStore::new();
        seed(&store).await;
        let result = store
            .apply_confirmation(
                ProviderName::Cardnet,
                "pi_missing",
                ConfirmationOutcome::Succeeded,
                json!({}),
            )
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::UnknownTransaction));
    }

    #[tokio::test]
    async fn failed_initiation_is_not_overwritten_after_settlement() {
        let store = InMemoryEntityStore::new();
        let (_, _, payment) = seed(&store).await;
        store
            .record_initiation(
                &payment.payment_ref,
                InitiationRecord::Accepted {
                    provider_reference: "pi_1".to_string(),
                    response: json!({}),
                },
            )
            .await
            .unwrap();
        store
            .apply_confirmation(
                ProviderName::Cardnet,
                "pi_1",
                ConfirmationOutcome::Succeeded,
                json!({}),
            )
            .await
            .unwrap();

        let after = store
            .record_initiation(
                &payment.payment_ref,
                InitiationRecord::Failed {
                    response: json!({"error": "late"}),
                },
            )
            .await
            .unwrap();
        assert_eq!(after.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn refund_requires_completed_payment() {
        let store = InMemoryEntityStore::new();
        let (_, _, payment) = seed(&store).await;
        let result = store
            .apply_refund(&payment.payment_ref, json!({"refund_reference": "re_1"}))
            .await
            .unwrap();
        assert!(matches!(
            result,
            RefundApplication::NotRefundable {
                status: PaymentStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn manual_status_update_rejects_regression() {
        let store = InMemoryEntityStore::new();
        let (_, order, _) = seed(&store).await;
        let change = store
            .update_order_status(&order.order_ref, OrderStatus::Shipped)
            .await
            .unwrap();
        assert!(matches!(
            change,
            OrderStatusChange::Rejected {
                current: OrderStatus::PendingPayment
            }
        ));
    }

    #[tokio::test]
    async fn stale_listing_only_returns_pollable_referenced_payments() {
        let store = InMemoryEntityStore::new();
        let (user, order, unreferenced) = seed(&store).await;
        let mut referenced = Vec::new();
        for (payment_ref, provider) in [
            ("PAY-2", ProviderName::Mpesa),
            ("PAY-3", ProviderName::BitPay),
        ] {
            let payment = store
                .insert_payment(NewPayment {
                    payment_ref: payment_ref.to_string(),
                    order_id: order.id,
                    user_id: user.id,
                    amount: BigDecimal::from(50),
                    currency: "USD".to_string(),
                    provider,
                })
                .await
                .unwrap();
            store
                .record_initiation(
                    payment_ref,
                    InitiationRecord::Accepted {
                        provider_reference: format!("ref-{payment_ref}"),
                        response: json!({}),
                    },
                )
                .await
                .unwrap();
            referenced.push(payment);
        }

        let listed = store
            .list_stale_pending_payments(
                Utc::now() + chrono::Duration::seconds(1),
                &[ProviderName::Cardnet, ProviderName::BitPay],
                10,
            )
            .await
            .unwrap();
        let refs: Vec<&str> = listed.iter().map(|p| p.payment_ref.as_str()).collect();
        assert_eq!(refs, vec!["PAY-3"]);
        assert!(unreferenced.provider_reference.is_none());
    }

    #[tokio::test]
    async fn tickets_belong_to_known_users_and_close_once() {
        let store = InMemoryEntityStore::new();
        let user = store.get_or_create_user("tg-9").await.unwrap();
        let new_ticket = |user_id| NewSupportTicket {
            ticket_ref: "TKT-1".to_string(),
            user_id,
            subject: "Refund question".to_string(),
            description: "Where is my refund?".to_string(),
            priority: Default::default(),
        };

        let err = store.insert_ticket(new_ticket(999)).await.unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::ForeignKeyViolation { .. }));

        let ticket = store.insert_ticket(new_ticket(user.id)).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);

        let change = store
            .update_ticket_status("TKT-1", TicketStatus::Closed)
            .await
            .unwrap();
        assert!(matches!(change, TicketStatusChange::Applied(ref t) if t.status == TicketStatus::Closed));

        let change = store
            .update_ticket_status("TKT-1", TicketStatus::InProgress)
            .await
            .unwrap();
        assert!(matches!(
            change,
            TicketStatusChange::Rejected {
                current: TicketStatus::Closed
            }
        ));
        assert!(store
            .update_ticket_status("TKT-missing", TicketStatus::Closed)
            .await
            .unwrap_err()
            .is_not_found());
    }
}

//! Receipt documents for settled and refunded payments
//!
//! Rendering and delivery are external collaborators. [`LocalReceiptService`]
//! writes a JSON receipt to disk and never sends email.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::models::{Order, Payment, User};
use crate::logging::mask_email;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("receipt I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("receipt serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ReceiptError> for crate::error::AppError {
    fn from(err: ReceiptError) -> Self {
        crate::error::AppError::internal(err.to_string())
    }
}

pub type ReceiptResult<T> = Result<T, ReceiptError>;

#[async_trait]
pub trait ReceiptService: Send + Sync {
    /// Returns the location of the generated receipt.
    async fn payment_receipt(
        &self,
        user: &User,
        order: &Order,
        payment: &Payment,
    ) -> ReceiptResult<String>;

    async fn refund_receipt(
        &self,
        user: &User,
        order: &Order,
        payment: &Payment,
        refund_amount: &BigDecimal,
        reason: &str,
    ) -> ReceiptResult<String>;

    /// Whether the receipt was actually delivered.
    async fn send_receipt_email(
        &self,
        email: &str,
        payment: &Payment,
        receipt_path: &str,
    ) -> ReceiptResult<bool>;
}

pub struct LocalReceiptService {
    directory: PathBuf,
}

impl LocalReceiptService {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    async fn write(&self, file_name: &str, document: serde_json::Value) -> ReceiptResult<String> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.directory.join(file_name);
        let bytes = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl ReceiptService for LocalReceiptService {
    async fn payment_receipt(
        &self,
        user: &User,
        order: &Order,
        payment: &Payment,
    ) -> ReceiptResult<String> {
        let document = json!({
            "type": "payment_receipt",
            "generated_at": Utc::now().to_rfc3339(),
            "customer": {
                "id": user.external_id,
                "email": user.email,
            },
            "payment": {
                "payment_ref": payment.payment_ref,
                "order_ref": order.order_ref,
                "amount": payment.amount.with_scale(2).to_string(),
                "currency": payment.currency,
                "provider": payment.provider,
                "status": payment.status,
                "provider_reference": payment.provider_reference,
                "created_at": payment.created_at.to_rfc3339(),
            },
        });

        let path = self
            .write(&format!("receipt_{}.json", payment.payment_ref), document)
            .await?;
        info!(payment_ref = %payment.payment_ref, path = %path, "payment receipt written");
        Ok(path)
    }

    async fn refund_receipt(
        &self,
        _user: &User,
        order: &Order,
        payment: &Payment,
        refund_amount: &BigDecimal,
        reason: &str,
    ) -> ReceiptResult<String> {
        let now = Utc::now();
        let document = json!({
            "type": "refund_receipt",
            "generated_at": now.to_rfc3339(),
            "original_payment_ref": payment.payment_ref,
            "original_order_ref": order.order_ref,
            "original_amount": payment.amount.with_scale(2).to_string(),
            "refund_amount": refund_amount.with_scale(2).to_string(),
            "currency": payment.currency,
            "reason": reason,
            "status": "processed",
        });

        let file_name = format!(
            "refund_{}_{}.json",
            payment.payment_ref,
            now.format("%Y%m%d_%H%M%S")
        );
        let path = self.write(&file_name, document).await?;
        info!(payment_ref = %payment.payment_ref, path = %path, "refund receipt written");
        Ok(path)
    }

    async fn send_receipt_email(
        &self,
        email: &str,
        payment: &Payment,
        _receipt_path: &str,
    ) -> ReceiptResult<bool> {
        warn!(
            payment_ref = %payment.payment_ref,
            email = %mask_email(email),
            "email delivery is not configured; receipt not sent"
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{OrderStatus, PaymentStatus};
    use crate::payments::types::ProviderName;

    fn fixtures() -> (User, Order, Payment) {
        let now = Utc::now();
        let user = User {
            id: 1,
            external_id: "tg-1".to_string(),
            email: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let order = Order {
            id: 7,
            order_ref: "ORD-1".to_string(),
            user_id: 1,
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
            description: None,
            status: OrderStatus::PaymentConfirmed,
            created_at: now,
            updated_at: now,
        };
        let payment = Payment {
            id: 3,
            payment_ref: "PAY-1".to_string(),
            order_id: 7,
            user_id: 1,
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
            provider: ProviderName::Cardnet,
            provider_reference: Some("pi_1".to_string()),
            status: PaymentStatus::Completed,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };
        (user, order, payment)
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("receipts-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn payment_receipt_is_written_as_json() {
        let dir = scratch_dir();
        let service = LocalReceiptService::new(&dir);
        let (user, order, payment) = fixtures();

        let path = service.payment_receipt(&user, &order, &payment).await.unwrap();
        assert!(path.ends_with("receipt_PAY-1.json"));

        let body: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(body["payment"]["amount"], "50.00");
        assert_eq!(body["payment"]["provider"], "cardnet");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn refund_receipt_records_partial_amount() {
        let dir = scratch_dir();
        let service = LocalReceiptService::new(&dir);
        let (user, order, payment) = fixtures();

        let path = service
            .refund_receipt(&user, &order, &payment, &BigDecimal::from(20), "Admin refund")
            .await
            .unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(body["refund_amount"], "20.00");
        assert_eq!(body["original_amount"], "50.00");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn email_is_never_sent() {
        let service = LocalReceiptService::new(scratch_dir());
        let (_, _, payment) = fixtures();
        let sent = service
            .send_receipt_email("buyer@example.com", &payment, "receipt.json")
            .await
            .unwrap();
        assert!(!sent);
    }
}

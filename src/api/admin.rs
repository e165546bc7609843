//! Operator endpoints: refunds, receipt regeneration, fulfilment and ticket updates.
//!
//! When `ADMIN_API_TOKEN` is set every route requires
//! `Authorization: Bearer <token>`.

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use super::{with_request_id, AppState};
use crate::database::models::{Order, OrderStatus, PaymentStatus, SupportTicket, TicketStatus};
use crate::error::{AppError, ValidationError};
use crate::logging::mask_email;
use crate::payments::utils::secure_eq;
use crate::services::refund::DEFAULT_REFUND_REASON;

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub payment_ref: String,
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponseBody {
    pub payment_ref: String,
    pub order_ref: String,
    pub refund_reference: String,
    pub refund_amount: BigDecimal,
    pub receipt_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequestBody {
    pub payment_ref: String,
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponseBody {
    pub receipt_path: String,
    pub email_sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();

    if secure_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        warn!("admin request rejected: bad or missing bearer token");
        Err(AppError::validation(ValidationError::Unauthorized))
    }
}

/// POST /admin/refund
pub async fn refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefundRequestBody>,
) -> Result<Json<RefundResponseBody>, AppError> {
    authorize(&state, &headers).map_err(with_request_id(&headers))?;

    let reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REFUND_REASON);

    let outcome = state
        .refunds
        .refund(&body.payment_ref, body.amount, reason)
        .await
        .map_err(with_request_id(&headers))?;

    Ok(Json(RefundResponseBody {
        payment_ref: outcome.payment.payment_ref,
        order_ref: outcome.order.order_ref,
        refund_reference: outcome.refund_reference,
        refund_amount: outcome.refund_amount,
        receipt_path: outcome.receipt_path,
    }))
}

/// POST /admin/receipt
pub async fn regenerate_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReceiptRequestBody>,
) -> Result<Json<ReceiptResponseBody>, AppError> {
    authorize(&state, &headers).map_err(with_request_id(&headers))?;

    let payment = state
        .orchestrator
        .get_payment(&body.payment_ref)
        .await
        .map_err(with_request_id(&headers))?;
    if payment.status != PaymentStatus::Completed {
        return Err(with_request_id(&headers)(AppError::validation(
            ValidationError::InvalidField {
                field: "payment_ref".to_string(),
                reason: format!(
                    "receipts are only issued for completed payments, got {}",
                    payment.status
                ),
            },
        )));
    }

    let store = state.orchestrator.store();
    let order = store
        .find_order_by_id(payment.order_id)
        .await
        .map_err(with_request_id(&headers))?
        .ok_or_else(|| AppError::internal(format!("order {} missing", payment.order_id)))
        .map_err(with_request_id(&headers))?;
    let user = store
        .find_user_by_id(payment.user_id)
        .await
        .map_err(with_request_id(&headers))?
        .ok_or_else(|| AppError::internal(format!("user {} missing", payment.user_id)))
        .map_err(with_request_id(&headers))?;

    let receipt_path = state
        .receipts
        .payment_receipt(&user, &order, &payment)
        .await
        .map_err(with_request_id(&headers))?;

    let email_sent = match body.user_email.as_deref().or(user.email.as_deref()) {
        Some(email) => match state
            .receipts
            .send_receipt_email(email, &payment, &receipt_path)
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                warn!(email = %mask_email(email), error = %e, "receipt email failed");
                false
            }
        },
        None => false,
    };

    info!(payment_ref = %payment.payment_ref, email_sent, "receipt regenerated");
    Ok(Json(ReceiptResponseBody {
        receipt_path,
        email_sent,
    }))
}

/// PATCH /admin/orders/{order_ref}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>, AppError> {
    authorize(&state, &headers).map_err(with_request_id(&headers))?;

    let target = OrderStatus::from_str(&body.status).map_err(|reason| {
        with_request_id(&headers)(AppError::validation(ValidationError::InvalidField {
            field: "status".to_string(),
            reason,
        }))
    })?;

    let order = state
        .orders
        .update_order_status(&order_ref, target)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(order))
}

/// PATCH /admin/support/tickets/{ticket_ref}/status
pub async fn update_ticket_status(
    State(state): State<AppState>,
    Path(ticket_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Json<SupportTicket>, AppError> {
    authorize(&state, &headers).map_err(with_request_id(&headers))?;

    let target = TicketStatus::from_str(&body.status).map_err(|reason| {
        with_request_id(&headers)(AppError::validation(ValidationError::InvalidField {
            field: "status".to_string(),
            reason,
        }))
    })?;

    let ticket = state
        .support
        .update_ticket_status(&ticket_ref, target)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(ticket))
}

//! Payment initiation, status and synchronous return legs

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tracing::info;

use super::{enforce_rate_limit, with_request_id, AppState};
use crate::database::models::{ConfirmationResult, Order, Payment, PaymentStatus};
use crate::error::{AppError, DomainError};
use crate::logging::mask_phone_number;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::payments::types::{ConfirmContext, ProviderName, UserAction};
use crate::services::payment_orchestrator::{DispatchContext, DispatchRequest, DispatchResult};
use crate::services::rate_limiter::ActionClass;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: String,
    pub provider: String,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetryPaymentRequest {
    pub user_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentInitiated {
    pub order_ref: String,
    pub payment_ref: String,
    pub provider: ProviderName,
    pub status: PaymentStatus,
    pub action: UserAction,
}

/// Payment as exposed over HTTP; the raw gateway response stays internal
#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub payment_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderName,
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentView {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_ref: payment.payment_ref.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            provider: payment.provider,
            provider_reference: payment.provider_reference.clone(),
            status: payment.status,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmationView {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentView>,
}

impl From<&ConfirmationResult> for ConfirmationView {
    fn from(result: &ConfirmationResult) -> Self {
        Self {
            result: result.label(),
            payment: result.payment().map(PaymentView::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PayPalReturnQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    #[serde(rename = "PayerID")]
    pub payer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayPalCancelQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CardnetReturnQuery {
    pub payment_intent: String,
}

pub(crate) fn parse_provider(raw: &str) -> Result<ProviderName, AppError> {
    ProviderName::from_str(raw).map_err(|_| {
        AppError::domain(DomainError::UnsupportedProvider {
            provider: raw.to_string(),
        })
    })
}

fn dispatch_response(order: &Order, result: DispatchResult, headers: &HeaderMap) -> Response {
    match result {
        DispatchResult::Initiated { payment, action } => (
            StatusCode::CREATED,
            Json(PaymentInitiated {
                order_ref: order.order_ref.clone(),
                payment_ref: payment.payment_ref,
                provider: payment.provider,
                status: payment.status,
                action,
            }),
        )
            .into_response(),
        DispatchResult::Failed { payment, error } => {
            let app_error = with_request_id(headers)(error);
            let status = StatusCode::from_u16(app_error.status_code())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let body = ErrorResponse::from_app_error(&app_error).with_details(json!({
                "order_ref": order.order_ref,
                "payment_ref": payment.payment_ref,
                "payment_status": payment.status,
            }));
            (status, Json(body)).into_response()
        }
    }
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    order: &Order,
    provider: ProviderName,
    email: Option<String>,
    phone: Option<String>,
) -> Result<Response, AppError> {
    if let Some(phone) = phone.as_deref() {
        info!(order_ref = %order.order_ref, provider = %provider, phone = %mask_phone_number(phone), "dispatching payment");
    }

    let result = state
        .orchestrator
        .dispatch_payment(DispatchRequest {
            order_ref: order.order_ref.clone(),
            provider,
            amount: order.amount.clone(),
            currency: order.currency.clone(),
            context: DispatchContext {
                email,
                phone,
                return_url: None,
            },
        })
        .await
        .map_err(with_request_id(headers))?;

    Ok(dispatch_response(order, result, headers))
}

/// POST /payments
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Response, AppError> {
    enforce_rate_limit(&state, &request.user_id, ActionClass::PaymentInitiation)
        .await
        .map_err(with_request_id(&headers))?;
    let provider = parse_provider(&request.provider).map_err(with_request_id(&headers))?;

    // Mobile money cannot proceed without a phone; reject before anything is stored
    let phone = request
        .phone
        .filter(|p| !p.trim().is_empty());
    if provider.requires_phone() && phone.is_none() {
        return Err(with_request_id(&headers)(
            crate::services::payment_orchestrator::OrchestratorError::PhoneNumberRequired {
                provider,
            },
        ));
    }

    if let Some(email) = request.email.as_deref() {
        state
            .orders
            .update_user_email(&request.user_id, email)
            .await
            .map_err(with_request_id(&headers))?;
    }

    let order = state
        .orders
        .create_order(
            &request.user_id,
            request.amount,
            request.currency.as_deref(),
            request.description.as_deref(),
        )
        .await
        .map_err(with_request_id(&headers))?;

    dispatch(&state, &headers, &order, provider, request.email, phone).await
}

/// POST /orders/{order_ref}/payments
pub async fn retry_order_payment(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RetryPaymentRequest>,
) -> Result<Response, AppError> {
    enforce_rate_limit(&state, &request.user_id, ActionClass::PaymentInitiation)
        .await
        .map_err(with_request_id(&headers))?;
    let provider = parse_provider(&request.provider).map_err(with_request_id(&headers))?;

    let user = state
        .orders
        .get_or_create_user(&request.user_id)
        .await
        .map_err(with_request_id(&headers))?;
    let details = state
        .orders
        .find_order(&order_ref)
        .await
        .map_err(with_request_id(&headers))?;
    // Another user's order is reported as missing
    if details.order.user_id != user.id {
        return Err(with_request_id(&headers)(AppError::domain(
            DomainError::OrderNotFound { order_ref },
        )));
    }

    dispatch(
        &state,
        &headers,
        &details.order,
        provider,
        request.email.or(user.email),
        request.phone,
    )
    .await
}

/// GET /payments/{payment_ref}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PaymentView>, AppError> {
    let payment = state
        .orchestrator
        .get_payment(&payment_ref)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(PaymentView::from(&payment)))
}

/// GET /payments/paypal/return?paymentId&PayerID
pub async fn paypal_return(
    State(state): State<AppState>,
    Query(query): Query<PayPalReturnQuery>,
    headers: HeaderMap,
) -> Result<Json<ConfirmationView>, AppError> {
    let result = state
        .orchestrator
        .confirm_with_provider(
            ProviderName::PayPal,
            &query.payment_id,
            ConfirmContext {
                payer_id: query.payer_id,
            },
        )
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(ConfirmationView::from(&result)))
}

/// GET /payments/paypal/cancel?paymentId
///
/// Leaves the payment untouched; reconciliation settles it from PayPal's state.
pub async fn paypal_cancel(
    State(state): State<AppState>,
    Query(query): Query<PayPalCancelQuery>,
    headers: HeaderMap,
) -> Result<Json<ConfirmationView>, AppError> {
    let result = state
        .orchestrator
        .record_payer_cancel(ProviderName::PayPal, &query.payment_id)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(ConfirmationView::from(&result)))
}

/// GET /payments/cardnet/return?payment_intent
pub async fn cardnet_return(
    State(state): State<AppState>,
    Query(query): Query<CardnetReturnQuery>,
    headers: HeaderMap,
) -> Result<Json<ConfirmationView>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    info!(payment_intent = %query.payment_intent, request_id = ?request_id, "card 3-D Secure return");
    let result = state
        .orchestrator
        .confirm_with_provider(
            ProviderName::Cardnet,
            &query.payment_intent,
            ConfirmContext::default(),
        )
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(ConfirmationView::from(&result)))
}

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::payments::PaymentView;
use super::{enforce_rate_limit, with_request_id, AppState};
use crate::database::models::Order;
use crate::error::AppError;
use crate::services::rate_limiter::ActionClass;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<PaymentView>,
}

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    enforce_rate_limit(&state, &request.user_id, ActionClass::Default)
        .await
        .map_err(with_request_id(&headers))?;
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
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{order_ref}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, AppError> {
    let details = state
        .orders
        .find_order(&order_ref)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(OrderResponse {
        payments: details.payments.iter().map(PaymentView::from).collect(),
        order: details.order,
    }))
}

//! HTTP surface
//!
//! Handlers translate requests into service calls and map service errors
//! onto [`AppError`](crate::error::AppError) responses.

pub mod admin;
pub mod orders;
pub mod payments;
pub mod support;
pub mod webhooks;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::warn;

use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::orders::OrderService;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::rate_limiter::{ActionClass, RateLimiter};
use crate::services::receipts::ReceiptService;
use crate::services::refund::RefundService;
use crate::services::support::SupportService;
use crate::services::webhook_processor::WebhookProcessor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub refunds: Arc<RefundService>,
    pub orders: Arc<OrderService>,
    pub support: Arc<SupportService>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub receipts: Arc<dyn ReceiptService>,
    pub health: HealthChecker,
    /// Admin routes are open when unset
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/payments", post(payments::create_payment))
        .route("/payments/paypal/return", get(payments::paypal_return))
        .route("/payments/paypal/cancel", get(payments::paypal_cancel))
        .route("/payments/cardnet/return", get(payments::cardnet_return))
        .route("/payments/{payment_ref}", get(payments::get_payment))
        .route("/orders", post(orders::create_order))
        .route("/orders/{order_ref}", get(orders::get_order))
        .route("/orders/{order_ref}/payments", post(payments::retry_order_payment))
        .route("/admin/refund", post(admin::refund))
        .route("/admin/receipt", post(admin::regenerate_receipt))
        .route("/admin/orders/{order_ref}/status", patch(admin::update_order_status))
        .route("/support/tickets", post(support::create_ticket))
        .route("/support/tickets/{ticket_ref}", get(support::get_ticket))
        .route(
            "/admin/support/tickets/{ticket_ref}/status",
            patch(admin::update_ticket_status),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Error mapper that stamps the `x-request-id` assigned by the request-id layer.
pub(crate) fn with_request_id<E: Into<AppError>>(
    headers: &HeaderMap,
) -> impl Fn(E) -> AppError + '_ {
    move |e| {
        let err = e.into();
        match get_request_id_from_headers(headers) {
            Some(id) => err.with_request_id(id),
            None => err,
        }
    }
}

/// Admits the call or fails with a 429 carrying the remaining cooldown.
pub(crate) async fn enforce_rate_limit(
    state: &AppState,
    identity: &str,
    action: ActionClass,
) -> Result<(), AppError> {
    if state.rate_limiter.is_allowed(identity, action).await {
        return Ok(());
    }

    let cooldown = state.rate_limiter.remaining_cooldown(identity, action).await;
    let retry_after = cooldown.as_secs() + u64::from(cooldown.subsec_nanos() > 0);
    warn!(identity = %identity, action = action.as_str(), retry_after, "request rate limited");
    Err(AppError::new(AppErrorKind::External(ExternalError::RateLimit {
        service: action.as_str().to_string(),
        retry_after: Some(retry_after),
    })))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = if status.status == HealthState::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}

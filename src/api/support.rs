use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use super::{enforce_rate_limit, with_request_id, AppState};
use crate::database::models::SupportTicket;
use crate::error::AppError;
use crate::services::rate_limiter::ActionClass;

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub user_id: String,
    pub subject: String,
    pub description: String,
    pub priority: Option<String>,
}

/// POST /support/tickets
pub async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<SupportTicket>), AppError> {
    enforce_rate_limit(&state, &request.user_id, ActionClass::SupportTicket)
        .await
        .map_err(with_request_id(&headers))?;

    let ticket = state
        .support
        .create_ticket(
            &request.user_id,
            &request.subject,
            &request.description,
            request.priority.as_deref(),
        )
        .await
        .map_err(with_request_id(&headers))?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /support/tickets/{ticket_ref}
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SupportTicket>, AppError> {
    let ticket = state
        .support
        .get_ticket(&ticket_ref)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(ticket))
}

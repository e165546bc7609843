use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::str::FromStr;
use tracing::{error, info, warn};

use super::AppState;
use crate::payments::types::ProviderName;
use crate::services::webhook_processor::WebhookProcessorError;

/// Headers that may carry a callback signature, checked in order
const SIGNATURE_HEADERS: [&str; 3] = ["cardnet-signature", "stripe-signature", "x-signature"];

fn extract_signature(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

fn is_mpesa(provider: &str) -> bool {
    matches!(ProviderName::from_str(provider), Ok(ProviderName::Mpesa))
}

/// M-Pesa expects its own acknowledgement envelope; everyone else gets `status`.
fn acknowledge(provider: &str, status: StatusCode, error: Option<String>) -> Response {
    let body = match (is_mpesa(provider), error) {
        (true, None) => json!({"ResultCode": 0, "ResultDesc": "Accepted"}),
        (true, Some(message)) => json!({"ResultCode": 1, "ResultDesc": message}),
        (false, None) => json!({"status": "ok"}),
        (false, Some(message)) => json!({"status": "error", "message": message}),
    };
    (status, Json(body)).into_response()
}

/// POST /webhooks/{provider}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    match state
        .webhooks
        .process_callback(&provider, extract_signature(&headers), &body)
        .await
    {
        Ok(receipt) => {
            info!(
                provider = %provider,
                provider_ref = %receipt.provider_reference,
                result = receipt.result,
                "Webhook processed"
            );
            acknowledge(&provider, StatusCode::OK, None)
        }
        Err(WebhookProcessorError::InvalidSignature(reason)) => {
            warn!(provider = %provider, reason = %reason, "Invalid webhook signature");
            acknowledge(
                &provider,
                StatusCode::UNAUTHORIZED,
                Some("invalid signature".to_string()),
            )
        }
        Err(e @ WebhookProcessorError::MalformedPayload(_))
        | Err(e @ WebhookProcessorError::UnknownProvider(_)) => {
            warn!(provider = %provider, error = %e, "Webhook rejected");
            acknowledge(&provider, StatusCode::BAD_REQUEST, Some(e.to_string()))
        }
        Err(e @ WebhookProcessorError::ProcessingError(_)) => {
            error!(provider = %provider, error = %e, "Webhook processing failed");
            acknowledge(
                &provider,
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("temporarily unable to process callback".to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_header_lookup_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", "generic".parse().unwrap());
        assert_eq!(extract_signature(&headers), Some("generic"));

        headers.insert("cardnet-signature", "t=1,v1=ab".parse().unwrap());
        assert_eq!(extract_signature(&headers), Some("t=1,v1=ab"));
        assert_eq!(extract_signature(&HeaderMap::new()), None);
    }

    #[test]
    fn mpesa_gets_its_own_envelope() {
        assert!(is_mpesa("mpesa"));
        assert!(is_mpesa("M-Pesa"));
        assert!(is_mpesa(" mobile_mpesa "));
        assert!(!is_mpesa("cardnet"));
        assert!(!is_mpesa("mtn"));
    }
}

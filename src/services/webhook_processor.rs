//! Provider callback reconciliation
//!
//! Each provider's native callback is verified, normalized into a
//! [`CallbackEvent`](crate::payments::types::CallbackEvent) and handed to the
//! orchestrator. Duplicate and out-of-order deliveries are absorbed by the
//! confirmation ordering rule, so nothing here keeps its own idempotency log.

use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::database::models::ConfirmationResult;
use crate::logging::redact_sensitive_data;
use crate::payments::error::GatewayError;
use crate::payments::types::ProviderName;
use crate::services::payment_orchestrator::{OrchestratorError, PaymentOrchestrator};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

impl From<WebhookProcessorError> for crate::error::AppError {
    fn from(err: WebhookProcessorError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError,
        };

        let kind = match err {
            WebhookProcessorError::InvalidSignature(_) => {
                AppErrorKind::Validation(ValidationError::Unauthorized)
            }
            WebhookProcessorError::UnknownProvider(provider) => {
                AppErrorKind::Domain(DomainError::UnsupportedProvider { provider })
            }
            WebhookProcessorError::MalformedPayload(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason,
                })
            }
            WebhookProcessorError::ProcessingError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
        };
        AppError::new(kind)
    }
}

/// What happened to one delivered callback
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub provider: ProviderName,
    pub provider_reference: String,
    pub event_type: String,
    /// `applied`, `replayed`, `ignored`, `unknown_transaction` or `no_outcome`
    pub result: &'static str,
}

pub struct WebhookProcessor {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn process_callback(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookReceipt, WebhookProcessorError> {
        let provider = ProviderName::from_str(provider_name)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        let adapter = self
            .orchestrator
            .providers()
            .get(provider)
            .ok_or_else(|| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;

        adapter.verify_callback(payload, signature).map_err(|e| {
            error!(provider = %provider, error = %e, "callback signature rejected");
            WebhookProcessorError::InvalidSignature(e.to_string())
        })?;

        let event = adapter.parse_callback(payload).map_err(|e| {
            warn!(provider = %provider, error = %e, "malformed callback");
            match e {
                GatewayError::MalformedPayload { message } => {
                    WebhookProcessorError::MalformedPayload(message)
                }
                other => WebhookProcessorError::MalformedPayload(other.to_string()),
            }
        })?;

        debug!(
            provider = %provider,
            payload = %redact_sensitive_data(&event.payload.to_string()),
            "callback parsed"
        );

        let Some(outcome) = event.outcome else {
            info!(
                provider = %provider,
                provider_ref = %event.provider_reference,
                event_type = %event.event_type,
                "callback carries no payment outcome"
            );
            return Ok(WebhookReceipt {
                provider,
                provider_reference: event.provider_reference,
                event_type: event.event_type,
                result: "no_outcome",
            });
        };

        let mut payload = event.payload;
        if let (Some(reason), Some(map)) = (event.reason.as_ref(), payload.as_object_mut()) {
            map.entry("failure_reason")
                .or_insert_with(|| serde_json::Value::String(reason.clone()));
        }

        let result = self
            .orchestrator
            .apply_confirmation(provider, &event.provider_reference, outcome, payload)
            .await
            .map_err(|e| match e {
                OrchestratorError::Storage(db) => {
                    error!(provider = %provider, error = %db, "callback could not be stored");
                    WebhookProcessorError::ProcessingError(db.to_string())
                }
                other => WebhookProcessorError::ProcessingError(other.to_string()),
            })?;

        if let ConfirmationResult::Applied { payment, .. } = &result {
            info!(
                provider = %provider,
                payment_ref = %payment.payment_ref,
                event_type = %event.event_type,
                "callback reconciled"
            );
        }

        Ok(WebhookReceipt {
            provider,
            provider_reference: event.provider_reference,
            event_type: event.event_type,
            result: result.label(),
        })
    }
}

#[cfg(test)]
#[path = "webhook_processor_tests.rs"]
mod tests;

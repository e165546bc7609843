use serde_json::{json, Value as JsonValue};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Credentials missing or refused by the provider
    #[error("Gateway unavailable: provider={provider}, message={message}")]
    GatewayUnavailable { provider: String, message: String },

    #[error("Gateway rejected request: provider={provider}, message={message}")]
    GatewayRejected {
        provider: String,
        message: String,
        provider_code: Option<String>,
    },

    /// Network failure, timeout or 5xx; the provider-side outcome is unknown
    #[error("Gateway transport error: provider={provider}, message={message}")]
    GatewayTransportError { provider: String, message: String },

    #[error("Operation {operation} is not supported by {provider}")]
    UnsupportedOperation {
        provider: String,
        operation: String,
    },

    #[error("Refunds are not supported by {provider}")]
    RefundNotSupported { provider: String },

    #[error("Refund rejected: provider={provider}, message={message}")]
    RefundRejected { provider: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Webhook signature verification failed: {message}")]
    InvalidSignature { message: String },

    #[error("Malformed provider payload: {message}")]
    MalformedPayload { message: String },
}

impl GatewayError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::GatewayUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::GatewayTransportError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(provider: impl Into<String>, operation: &str) -> Self {
        GatewayError::UnsupportedOperation {
            provider: provider.into(),
            operation: operation.to_string(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        GatewayError::MalformedPayload {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::GatewayTransportError { .. })
    }

    /// Transport failures leave the provider-side outcome unknown, so the
    /// payment must not be marked failed.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, GatewayError::GatewayTransportError { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::MalformedPayload { .. } => 400,
            GatewayError::InvalidSignature { .. } => 401,
            GatewayError::UnsupportedOperation { .. } => 400,
            GatewayError::RefundNotSupported { .. } => 400,
            GatewayError::GatewayUnavailable { .. } => 502,
            GatewayError::GatewayRejected { .. } => 502,
            GatewayError::RefundRejected { .. } => 502,
            GatewayError::GatewayTransportError { .. } => 504,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::GatewayUnavailable { .. } => {
                "Payment provider is not available right now".to_string()
            }
            GatewayError::GatewayRejected { message, .. } => {
                format!("Payment provider rejected the request: {}", message)
            }
            GatewayError::GatewayTransportError { .. } => {
                "Payment provider did not respond in time. The payment is still pending"
                    .to_string()
            }
            GatewayError::UnsupportedOperation { .. } => {
                "This payment method does not support that operation".to_string()
            }
            GatewayError::RefundNotSupported { .. } => {
                "This payment method does not support refunds".to_string()
            }
            GatewayError::RefundRejected { .. } => {
                "Payment provider rejected the refund".to_string()
            }
            GatewayError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
            GatewayError::MalformedPayload { .. } => "Malformed provider payload".to_string(),
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            GatewayError::GatewayUnavailable { provider, .. }
            | GatewayError::GatewayRejected { provider, .. }
            | GatewayError::GatewayTransportError { provider, .. }
            | GatewayError::UnsupportedOperation { provider, .. }
            | GatewayError::RefundNotSupported { provider }
            | GatewayError::RefundRejected { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Audit record stored on the payment when an initiate call fails.
    pub fn to_audit_json(&self) -> JsonValue {
        let mut record = json!({
            "error": self.kind_label(),
            "message": self.to_string(),
        });
        if let GatewayError::GatewayRejected {
            provider_code: Some(code),
            ..
        } = self
        {
            record["provider_code"] = json!(code);
        }
        record
    }

    fn kind_label(&self) -> &'static str {
        match self {
            GatewayError::GatewayUnavailable { .. } => "gateway_unavailable",
            GatewayError::GatewayRejected { .. } => "gateway_rejected",
            GatewayError::GatewayTransportError { .. } => "gateway_transport_error",
            GatewayError::UnsupportedOperation { .. } => "unsupported_operation",
            GatewayError::RefundNotSupported { .. } => "refund_not_supported",
            GatewayError::RefundRejected { .. } => "refund_rejected",
            GatewayError::ValidationError { .. } => "validation_error",
            GatewayError::InvalidSignature { .. } => "invalid_signature",
            GatewayError::MalformedPayload { .. } => "malformed_payload",
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match &err {
            GatewayError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            GatewayError::MalformedPayload { message } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason: message.clone(),
                })
            }
            GatewayError::InvalidSignature { .. } => {
                AppErrorKind::Validation(ValidationError::Unauthorized)
            }
            GatewayError::UnsupportedOperation { .. } | GatewayError::RefundNotSupported { .. } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "provider".to_string(),
                    reason: err.user_message(),
                })
            }
            GatewayError::GatewayTransportError { provider, .. } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: provider.clone(),
                    timeout_secs: 0,
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: err.provider().unwrap_or("payments").to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

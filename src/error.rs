//! Unified error handling for the payment backend
//!
//! Every module keeps its own typed error enum; at the HTTP boundary they are
//! folded into [`AppError`], which carries the status code, a machine-readable
//! [`ErrorCode`] and a message that is safe to show to end users.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by API clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "TICKET_NOT_FOUND")]
    TicketNotFound,
    #[serde(rename = "ORDER_NOT_PAYABLE")]
    OrderNotPayable,
    #[serde(rename = "NOT_REFUNDABLE")]
    NotRefundable,
    #[serde(rename = "REFUND_IN_PROGRESS")]
    RefundInProgress,
    #[serde(rename = "AMOUNT_EXCEEDS_ORIGINAL")]
    AmountExceedsOriginal,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "UNSUPPORTED_PROVIDER")]
    UnsupportedProvider,
    #[serde(rename = "INVALID_CURRENCY")]
    InvalidCurrency,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations on orders and payments
#[derive(Debug, Clone)]
pub enum DomainError {
    OrderNotFound { order_ref: String },
    PaymentNotFound { payment_ref: String },
    TicketNotFound { ticket_ref: String },
    /// Order is no longer waiting for a payment
    OrderNotPayable { order_ref: String, status: String },
    /// Payment status does not allow a refund
    NotRefundable { payment_ref: String, status: String },
    RefundInProgress { payment_ref: String },
    AmountExceedsOriginal { requested: String, original: String },
    InvalidStatusTransition { from: String, to: String },
    UnsupportedProvider { provider: String },
    DuplicateReference { reference: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Redis unavailable
    Cache { message: String },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Receipt generation or any other internal failure
    Internal { message: String },
}

/// External service errors (payment providers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment provider rejected the request or is unavailable
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Caller exceeded a rate limit
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value failed a format check
    InvalidField { field: String, reason: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Missing or wrong admin credentials
    Unauthorized,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::TicketNotFound { .. } => 404,
                DomainError::OrderNotPayable { .. } => 409,
                DomainError::NotRefundable { .. } => 409,
                DomainError::RefundInProgress { .. } => 409,
                DomainError::AmountExceedsOriginal { .. } => 422,
                DomainError::InvalidStatusTransition { .. } => 409,
                DomainError::UnsupportedProvider { .. } => 400,
                DomainError::DuplicateReference { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Unauthorized => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::TicketNotFound { .. } => ErrorCode::TicketNotFound,
                DomainError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
                DomainError::NotRefundable { .. } => ErrorCode::NotRefundable,
                DomainError::RefundInProgress { .. } => ErrorCode::RefundInProgress,
                DomainError::AmountExceedsOriginal { .. } => ErrorCode::AmountExceedsOriginal,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::UnsupportedProvider { .. } => ErrorCode::UnsupportedProvider,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { .. } => ErrorCode::InvalidCurrency,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::Unauthorized => ErrorCode::Unauthorized,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_ref } => {
                    format!("Order '{}' not found", order_ref)
                }
                DomainError::PaymentNotFound { payment_ref } => {
                    format!("Payment '{}' not found", payment_ref)
                }
                DomainError::TicketNotFound { ticket_ref } => {
                    format!("Support ticket '{}' not found", ticket_ref)
                }
                DomainError::OrderNotPayable { order_ref, status } => {
                    format!(
                        "Order '{}' cannot accept a payment while it is {}",
                        order_ref, status
                    )
                }
                DomainError::NotRefundable {
                    payment_ref,
                    status,
                } => {
                    format!(
                        "Payment '{}' cannot be refunded while it is {}",
                        payment_ref, status
                    )
                }
                DomainError::RefundInProgress { payment_ref } => {
                    format!("A refund for payment '{}' is already in progress", payment_ref)
                }
                DomainError::AmountExceedsOriginal {
                    requested,
                    original,
                } => {
                    format!(
                        "Refund amount {} exceeds the original payment amount {}",
                        requested, original
                    )
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Cannot change status from {} to {}", from, to)
                }
                DomainError::UnsupportedProvider { provider } => {
                    format!("Payment provider '{}' is not supported", provider)
                }
                DomainError::DuplicateReference { reference } => {
                    format!("Reference '{}' already exists", reference)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        format!("Payment provider ({}) declined the request", provider)
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!(
                            "Rate limit exceeded for {}. Please try again later",
                            service
                        )
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::Unauthorized => "Missing or invalid admin token".to_string(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::RefundInProgress { .. }),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from module errors live next to those errors
// (database/error.rs, payments/error.rs, services/*).

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_not_found_error() {
        let error = AppError::domain(DomainError::OrderNotFound {
            order_ref: "ORD-1".to_string(),
        });

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::OrderNotFound);
        assert!(error.user_message().contains("ORD-1"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_amount_exceeds_original_error() {
        let error = AppError::domain(DomainError::AmountExceedsOriginal {
            requested: "60.00".to_string(),
            original: "50.00".to_string(),
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::AmountExceedsOriginal);
        assert!(error.user_message().contains("60.00"));
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "payment_initiation".to_string(),
            retry_after: Some(120),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.user_message().contains("120 seconds"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_code_serializes_screaming_case() {
        let json = serde_json::to_string(&ErrorCode::NotRefundable).unwrap();
        assert_eq!(json, "\"NOT_REFUNDABLE\"");
    }
}

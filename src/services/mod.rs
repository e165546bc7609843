//! Services module for business logic and integrations

pub mod orders;
pub mod payment_orchestrator;
pub mod rate_limiter;
pub mod receipts;
pub mod refund;
pub mod support;
pub mod webhook_processor;

// Re-export orchestrator types
pub use crate::services::payment_orchestrator::{
    DispatchContext, DispatchRequest, DispatchResult, OrchestratorConfig, OrchestratorError,
    OrchestratorResult, PaymentOrchestrator, ReconcileSummary,
};

pub use crate::services::orders::{OrderDetails, OrderService, OrderServiceError};
pub use crate::services::rate_limiter::{ActionClass, InMemoryRateLimiter, RateLimitRule, RateLimiter};
pub use crate::services::receipts::{LocalReceiptService, ReceiptService};
pub use crate::services::refund::{RefundError, RefundOutcome, RefundService};
pub use crate::services::support::{SupportError, SupportService};
pub use crate::services::webhook_processor::{WebhookProcessor, WebhookProcessorError, WebhookReceipt};

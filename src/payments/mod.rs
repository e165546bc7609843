//! Provider adapters and the registry the orchestrator dispatches through

pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use provider::PaymentProvider;
pub use registry::ProviderRegistry;
pub use types::ProviderName;

use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::types::{
    CallbackEvent, ConfirmContext, InitiateRequest, InitiateResponse, ProviderName,
    RefundRequest, RefundResponse, StatusResponse,
};
use async_trait::async_trait;

/// Uniform contract over one payment provider's remote API.
///
/// Every remote call is a single attempt bounded by the adapter's timeout; a
/// timeout surfaces as [`GatewayError::GatewayTransportError`] and is never
/// retried here.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse>;

    /// Completes a synchronous confirmation leg (approval return, 3-D Secure).
    async fn confirm(
        &self,
        _provider_reference: &str,
        _context: ConfirmContext,
    ) -> GatewayResult<StatusResponse> {
        Err(GatewayError::unsupported(self.name().as_str(), "confirm"))
    }

    async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse>;

    /// Whether `query_status` can settle a pending payment. Callback-only providers say no.
    fn supports_status_polling(&self) -> bool {
        true
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse>;

    /// Checks the callback's authenticity. Providers without signed callbacks accept everything.
    fn verify_callback(&self, _payload: &[u8], _signature: Option<&str>) -> GatewayResult<()> {
        Ok(())
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent>;

    fn supported_currencies(&self) -> &'static [&'static str];
}

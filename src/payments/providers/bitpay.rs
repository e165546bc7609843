//! BitPay invoices

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::cardnet::non_empty_env;
use crate::payments::types::{
    CallbackEvent, InitiateRequest, InitiateResponse, ProviderName, ProviderStatus,
    RefundRequest, RefundResponse, StatusResponse, UserAction,
};
use crate::payments::utils::{Auth, GatewayHttpClient};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "bitpay";
const API_VERSION: (&str, &str) = ("X-Accept-Version", "2.0.0");

#[derive(Debug, Clone)]
pub struct BitPayConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub notification_url: Option<String>,
    pub redirect_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BitPayConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: "https://test.bitpay.com".to_string(),
            notification_url: None,
            redirect_url: None,
            timeout_secs: 30,
        }
    }
}

impl BitPayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = match std::env::var("BITPAY_ENVIRONMENT").as_deref() {
            Ok("production") => "https://bitpay.com".to_string(),
            _ => defaults.base_url,
        };
        Self {
            api_token: non_empty_env("BITPAY_API_TOKEN"),
            base_url,
            notification_url: non_empty_env("BITPAY_NOTIFICATION_URL"),
            redirect_url: non_empty_env("BITPAY_REDIRECT_URL"),
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

pub struct BitPayProvider {
    config: BitPayConfig,
    http: GatewayHttpClient,
}

impl BitPayProvider {
    pub fn new(config: BitPayConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(BitPayConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_token(&self) -> GatewayResult<&str> {
        self.config
            .api_token
            .as_deref()
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "BITPAY_API_TOKEN is not configured"))
    }

    pub(crate) fn map_status(status: &str) -> ProviderStatus {
        match status {
            "confirmed" | "complete" => ProviderStatus::Succeeded,
            "paid" => ProviderStatus::Processing,
            "new" => ProviderStatus::Pending,
            "expired" => ProviderStatus::Expired,
            "invalid" | "declined" => ProviderStatus::Failed,
            _ => ProviderStatus::Unknown,
        }
    }

    /// Invoice payloads come either bare or wrapped in `data`.
    fn invoice(body: &JsonValue) -> &JsonValue {
        match body.get("data") {
            Some(data) if data.is_object() => data,
            _ => body,
        }
    }
}

#[async_trait]
impl PaymentProvider for BitPayProvider {
    fn name(&self) -> ProviderName {
        ProviderName::BitPay
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let token = self.api_token()?;

        let mut payload = json!({
            "price": request.amount.to_decimal_string(),
            "currency": request.amount.currency,
            "orderId": request.order_reference,
            "posData": request.payment_reference,
            "notificationURL": self.config.notification_url,
            "redirectURL": request.return_url.clone().or_else(|| self.config.redirect_url.clone()),
            "transactionSpeed": "medium",
            "fullNotifications": true,
            "token": token,
        });
        if let Some(email) = request.customer.email.as_deref() {
            payload["buyer"] = json!({"email": email});
        }

        let reply = self
            .http
            .post_json(&self.endpoint("/invoices"), Auth::Bearer(token), &payload, &[API_VERSION])
            .await?;

        let invoice = Self::invoice(&reply.body);
        let (Some(id), Some(url)) = (
            invoice.get("id").and_then(|v| v.as_str()),
            invoice.get("url").and_then(|v| v.as_str()),
        ) else {
            return Err(GatewayError::GatewayRejected {
                provider: PROVIDER.to_string(),
                message: "invoice response carried no id or url".to_string(),
                provider_code: None,
            });
        };
        let (id, url) = (id.to_string(), url.to_string());

        info!(provider = PROVIDER, provider_ref = %id, "invoice created");

        Ok(InitiateResponse {
            provider_reference: id,
            action: UserAction::Redirect { url },
            raw: reply.body,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse> {
        let token = self.api_token()?;
        let url = format!(
            "{}?token={}",
            self.endpoint(&format!("/invoices/{}", provider_reference)),
            token
        );
        let reply = self
            .http
            .get(&url, Auth::Bearer(token), &[API_VERSION])
            .await?;

        let invoice = Self::invoice(&reply.body);
        let status = invoice
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(ProviderStatus::Unknown);
        let failure_reason = invoice
            .get("exceptionStatus")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(StatusResponse {
            status,
            provider_reference: provider_reference.to_string(),
            failure_reason,
            raw: reply.body,
        })
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<RefundResponse> {
        Err(GatewayError::RefundNotSupported {
            provider: PROVIDER.to_string(),
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(format!("invalid BitPay notification: {}", e)))?;
        let invoice = Self::invoice(&raw);
        let provider_reference = invoice
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("invoice id is required"))?
            .to_string();
        let status = invoice
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("invoice status is required"))?
            .to_string();
        let reason = invoice
            .get("exceptionStatus")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let event_type = raw
            .pointer("/event/name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("invoice_{}", status));

        Ok(CallbackEvent {
            provider_reference,
            outcome: Self::map_status(&status).outcome(),
            reason,
            event_type,
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "BTC", "BCH", "ETH", "USDC", "DOGE", "LTC"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> BitPayProvider {
        BitPayProvider::new(BitPayConfig::default()).unwrap()
    }

    #[test]
    fn confirmed_invoice_is_success() {
        let payload = br#"{"id":"inv_1","status":"confirmed","price":50,"currency":"USD"}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.provider_reference, "inv_1");
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Succeeded));
    }

    #[test]
    fn wrapped_notification_shape_is_accepted() {
        let payload = br#"{"event":{"code":1003,"name":"invoice_expired"},"data":{"id":"inv_2","status":"expired"}}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.provider_reference, "inv_2");
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Failed));
        assert_eq!(event.event_type, "invoice_expired");
    }

    #[test]
    fn paid_but_unconfirmed_is_pending() {
        let payload = br#"{"id":"inv_3","status":"paid"}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Pending));
    }

    #[test]
    fn missing_status_is_malformed() {
        let err = provider().parse_callback(br#"{"id":"inv_4"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn missing_token_is_unavailable() {
        let err = provider().query_status("inv_1").await.unwrap_err();
        assert!(matches!(err, GatewayError::GatewayUnavailable { .. }));
    }
}

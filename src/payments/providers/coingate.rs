//! CoinGate crypto orders

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

const PROVIDER: &str = "coingate";

#[derive(Debug, Clone)]
pub struct CoinGateConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CoinGateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: "https://api-sandbox.coingate.com".to_string(),
            callback_url: None,
            success_url: None,
            cancel_url: None,
            timeout_secs: 30,
        }
    }
}

impl CoinGateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = match std::env::var("COINGATE_ENVIRONMENT").as_deref() {
            Ok("production") | Ok("live") => "https://api.coingate.com".to_string(),
            _ => defaults.base_url,
        };
        Self {
            api_token: non_empty_env("COINGATE_API_TOKEN"),
            base_url,
            callback_url: non_empty_env("COINGATE_CALLBACK_URL"),
            success_url: non_empty_env("COINGATE_SUCCESS_URL"),
            cancel_url: non_empty_env("COINGATE_CANCEL_URL"),
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

pub struct CoinGateProvider {
    config: CoinGateConfig,
    http: GatewayHttpClient,
}

impl CoinGateProvider {
    pub fn new(config: CoinGateConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(CoinGateConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> GatewayResult<String> {
        self.config
            .api_token
            .as_deref()
            .map(|token| format!("Token {}", token))
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "COINGATE_API_TOKEN is not configured"))
    }

    pub(crate) fn map_status(status: &str) -> ProviderStatus {
        match status {
            "paid" => ProviderStatus::Succeeded,
            "new" | "pending" => ProviderStatus::Pending,
            "confirming" => ProviderStatus::Processing,
            "invalid" => ProviderStatus::Failed,
            "expired" => ProviderStatus::Expired,
            "canceled" => ProviderStatus::Cancelled,
            "refunded" => ProviderStatus::Refunded,
            _ => ProviderStatus::Unknown,
        }
    }

    /// Order ids are numeric on the wire; they are stored as strings.
    fn order_id(value: Option<&JsonValue>) -> Option<String> {
        match value? {
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentProvider for CoinGateProvider {
    fn name(&self) -> ProviderName {
        ProviderName::CoinGate
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let authorization = self.auth_header()?;

        let payload = json!({
            "order_id": request.payment_reference,
            "price_amount": request.amount.to_decimal_string(),
            "price_currency": request.amount.currency,
            "receive_currency": request.amount.currency,
            "title": format!("Order {}", request.order_reference),
            "description": request.description,
            "callback_url": self.config.callback_url,
            "success_url": request.return_url.clone().or_else(|| self.config.success_url.clone()),
            "cancel_url": self.config.cancel_url,
            "purchaser_email": request.customer.email,
        });

        let reply = self
            .http
            .post_json(
                &self.endpoint("/v2/orders"),
                Auth::None,
                &payload,
                &[("Authorization", authorization.as_str())],
            )
            .await?;

        let id = Self::order_id(reply.body.get("id"));
        let url = reply
            .body
            .get("payment_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let (Some(id), Some(url)) = (id, url) else {
            return Err(GatewayError::GatewayRejected {
                provider: PROVIDER.to_string(),
                message: "order response carried no id or payment_url".to_string(),
                provider_code: None,
            });
        };

        info!(provider = PROVIDER, provider_ref = %id, "crypto order created");

        Ok(InitiateResponse {
            provider_reference: id,
            action: UserAction::Redirect { url },
            raw: reply.body,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse> {
        let authorization = self.auth_header()?;
        let reply = self
            .http
            .get(
                &self.endpoint(&format!("/v2/orders/{}", provider_reference)),
                Auth::None,
                &[("Authorization", authorization.as_str())],
            )
            .await?;

        let status = reply
            .body
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(ProviderStatus::Unknown);

        Ok(StatusResponse {
            status,
            provider_reference: provider_reference.to_string(),
            failure_reason: None,
            raw: reply.body,
        })
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<RefundResponse> {
        Err(GatewayError::RefundNotSupported {
            provider: PROVIDER.to_string(),
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        // CoinGate posts JSON when configured for it; the legacy form body is accepted too
        let raw: JsonValue = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(_) => form_to_json(payload)
                .ok_or_else(|| GatewayError::malformed("invalid CoinGate callback body"))?,
        };

        let provider_reference = Self::order_id(raw.get("id"))
            .ok_or_else(|| GatewayError::malformed("order id is required"))?;
        let status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("status is required"))?
            .to_string();

        Ok(CallbackEvent {
            provider_reference,
            outcome: Self::map_status(&status).outcome(),
            reason: None,
            event_type: format!("order_{}", status),
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "BTC", "ETH", "LTC", "USDT", "USDC"]
    }
}

fn form_to_json(payload: &[u8]) -> Option<JsonValue> {
    let text = std::str::from_utf8(payload).ok()?;
    if !text.contains('=') {
        return None;
    }
    let mut map = serde_json::Map::new();
    for pair in text.split('&') {
        let (key, value) = pair.split_once('=')?;
        map.insert(key.to_string(), JsonValue::String(value.replace('+', " ")));
    }
    Some(JsonValue::Object(map))
}

//! MTN Mobile Money collections (request-to-pay)

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::cardnet::non_empty_env;
use crate::payments::types::{
    CallbackEvent, InitiateRequest, InitiateResponse, ProviderName, RefundRequest,
    RefundResponse, StatusResponse, UserAction,
};
use crate::payments::utils::{Auth, Body, GatewayHttpClient};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const PROVIDER: &str = "mtn";

#[derive(Debug, Clone)]
pub struct MtnConfig {
    pub subscription_key: Option<String>,
    pub api_user: Option<String>,
    pub api_key: Option<String>,
    pub target_environment: String,
    pub callback_url: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MtnConfig {
    fn default() -> Self {
        Self {
            subscription_key: None,
            api_user: None,
            api_key: None,
            target_environment: "sandbox".to_string(),
            callback_url: None,
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MtnConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let target_environment =
            non_empty_env("MTN_ENVIRONMENT").unwrap_or(defaults.target_environment);
        let base_url = if target_environment == "sandbox" {
            defaults.base_url
        } else {
            "https://proxy.momoapi.mtn.com".to_string()
        };
        Self {
            subscription_key: non_empty_env("MTN_SUBSCRIPTION_KEY"),
            api_user: non_empty_env("MTN_API_USER"),
            api_key: non_empty_env("MTN_API_KEY"),
            target_environment,
            callback_url: non_empty_env("MTN_CALLBACK_URL"),
            base_url,
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

pub struct MtnMomoProvider {
    config: MtnConfig,
    http: GatewayHttpClient,
}

impl MtnMomoProvider {
    pub fn new(config: MtnConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MtnConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn subscription_key(&self) -> GatewayResult<&str> {
        self.config
            .subscription_key
            .as_deref()
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "MTN_SUBSCRIPTION_KEY is required"))
    }

    async fn access_token(&self) -> GatewayResult<String> {
        let subscription_key = self.subscription_key()?;
        let (Some(user), Some(key)) = (self.config.api_user.as_deref(), self.config.api_key.as_deref())
        else {
            return Err(GatewayError::unavailable(
                PROVIDER,
                "MTN_API_USER and MTN_API_KEY are required",
            ));
        };

        let reply = self
            .http
            .send(
                reqwest::Method::POST,
                &self.endpoint("/collection/token/"),
                Auth::Basic {
                    username: user,
                    password: key,
                },
                Body::Empty,
                &[("Ocp-Apim-Subscription-Key", subscription_key)],
            )
            .await?;
        reply
            .body
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "token response carried no access_token"))
    }

    fn map_status(status: &str) -> Option<ConfirmationOutcome> {
        match status.to_uppercase().as_str() {
            "SUCCESSFUL" => Some(ConfirmationOutcome::Succeeded),
            "FAILED" | "REJECTED" | "TIMEOUT" => Some(ConfirmationOutcome::Failed),
            "PENDING" => Some(ConfirmationOutcome::Pending),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentProvider for MtnMomoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::MtnMomo
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let phone: String = request
            .customer
            .phone
            .as_deref()
            .map(|p| p.chars().filter(|c| c.is_ascii_digit()).collect())
            .filter(|p: &String| !p.is_empty())
            .ok_or_else(|| GatewayError::ValidationError {
                message: "phone number is required for MTN Mobile Money".to_string(),
                field: Some("phone".to_string()),
            })?;

        let token = self.access_token().await?;
        let subscription_key = self.subscription_key()?;
        // The reference id doubles as externalId so the callback can be correlated
        let reference_id = Uuid::new_v4().to_string();

        let payload = json!({
            "amount": request.amount.amount.round(0).to_string(),
            "currency": request.amount.currency,
            "externalId": reference_id,
            "payer": {"partyIdType": "MSISDN", "partyId": phone},
            "payerMessage": format!("Payment for order {}", request.order_reference),
            "payeeNote": format!("Order {}", request.order_reference),
        });

        let mut headers = vec![
            ("X-Reference-Id", reference_id.as_str()),
            ("X-Target-Environment", self.config.target_environment.as_str()),
            ("Ocp-Apim-Subscription-Key", subscription_key),
        ];
        if let Some(callback) = self.config.callback_url.as_deref() {
            headers.push(("X-Callback-Url", callback));
        }

        let reply = self
            .http
            .post_json(
                &self.endpoint("/collection/v1_0/requesttopay"),
                Auth::Bearer(&token),
                &payload,
                &headers,
            )
            .await?;

        info!(provider = PROVIDER, provider_ref = %reference_id, "request-to-pay sent");

        Ok(InitiateResponse {
            provider_reference: reference_id.clone(),
            action: UserAction::PushToDevice {
                instructions: "Approve the MTN Mobile Money prompt on your phone".to_string(),
            },
            raw: json!({
                "http_status": reply.status,
                "reference_id": reference_id,
                "status": "PENDING",
            }),
        })
    }

    async fn query_status(&self, _provider_reference: &str) -> GatewayResult<StatusResponse> {
        Err(GatewayError::unsupported(PROVIDER, "query_status"))
    }

    fn supports_status_polling(&self) -> bool {
        false
    }

    async fn refund(&self, _request: RefundRequest) -> GatewayResult<RefundResponse> {
        Err(GatewayError::RefundNotSupported {
            provider: PROVIDER.to_string(),
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(format!("invalid MTN callback: {}", e)))?;
        let provider_reference = raw
            .get("externalId")
            .or_else(|| raw.get("referenceId"))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::malformed("externalId is required"))?
            .to_string();
        let status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("status is required"))?
            .to_string();

        let reason = match raw.get("reason") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Object(obj)) => obj
                .get("message")
                .or_else(|| obj.get("code"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        };

        Ok(CallbackEvent {
            provider_reference,
            outcome: Self::map_status(&status),
            reason,
            event_type: status,
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["EUR", "UGX", "GHS", "ZMW", "XAF", "XOF", "RWF"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MtnMomoProvider {
        MtnMomoProvider::new(MtnConfig::default()).unwrap()
    }

    #[test]
    fn successful_callback() {
        let payload = br#"{"externalId":"0b6c6c1e-1111","amount":"50","currency":"EUR","status":"SUCCESSFUL"}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.provider_reference, "0b6c6c1e-1111");
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Succeeded));
    }

    #[test]
    fn failed_callback_with_structured_reason() {
        let payload = br#"{"externalId":"ref-2","status":"FAILED","reason":{"code":"PAYER_NOT_FOUND","message":"Payer not found"}}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Failed));
        assert_eq!(event.reason.as_deref(), Some("Payer not found"));
    }

    #[test]
    fn pending_callback_is_non_terminal() {
        let payload = br#"{"externalId":"ref-3","status":"PENDING"}"#;
        let event = provider().parse_callback(payload).unwrap();
        assert_eq!(event.outcome, Some(ConfirmationOutcome::Pending));
    }

    #[test]
    fn missing_reference_is_malformed() {
        let err = provider()
            .parse_callback(br#"{"status":"SUCCESSFUL"}"#)
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn status_polling_is_unsupported() {
        let err = provider().query_status("ref-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedOperation { .. }));
        assert!(!provider().supports_status_polling());
    }
}

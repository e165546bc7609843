//! M-Pesa STK push (Daraja API)

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::cardnet::non_empty_env;
use crate::payments::types::{
    CallbackEvent, InitiateRequest, InitiateResponse, ProviderName, RefundRequest,
    RefundResponse, StatusResponse, UserAction,
};
use crate::payments::utils::{Auth, GatewayHttpClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "mpesa";

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub shortcode: Option<String>,
    pub passkey: Option<String>,
    pub callback_url: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            consumer_key: None,
            consumer_secret: None,
            shortcode: None,
            passkey: None,
            callback_url: "http://localhost:8000/webhooks/mpesa".to_string(),
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MpesaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = match std::env::var("MPESA_ENVIRONMENT").as_deref() {
            Ok("production") => "https://api.safaricom.co.ke".to_string(),
            _ => defaults.base_url,
        };
        Self {
            consumer_key: non_empty_env("MPESA_CONSUMER_KEY"),
            consumer_secret: non_empty_env("MPESA_CONSUMER_SECRET"),
            shortcode: non_empty_env("MPESA_SHORTCODE"),
            passkey: non_empty_env("MPESA_PASSKEY"),
            callback_url: non_empty_env("MPESA_CALLBACK_URL").unwrap_or(defaults.callback_url),
            base_url,
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

pub struct MpesaProvider {
    config: MpesaConfig,
    http: GatewayHttpClient,
}

impl MpesaProvider {
    pub fn new(config: MpesaConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MpesaConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> GatewayResult<String> {
        let (Some(key), Some(secret)) = (
            self.config.consumer_key.as_deref(),
            self.config.consumer_secret.as_deref(),
        ) else {
            return Err(GatewayError::unavailable(
                PROVIDER,
                "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET are required",
            ));
        };

        let reply = self
            .http
            .get(
                &self.endpoint("/oauth/v1/generate?grant_type=client_credentials"),
                Auth::Basic {
                    username: key,
                    password: secret,
                },
                &[],
            )
            .await?;
        reply
            .body
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "token response carried no access_token"))
    }

    /// `base64(shortcode + passkey + timestamp)`
    pub(crate) fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
        STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
    }

    /// Normalizes to the `2547XXXXXXXX` form the STK push expects.
    pub(crate) fn normalize_phone(phone: &str) -> String {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if let Some(rest) = digits.strip_prefix('0') {
            format!("254{}", rest)
        } else if digits.starts_with("254") {
            digits
        } else {
            format!("254{}", digits)
        }
    }
}

#[async_trait]
impl PaymentProvider for MpesaProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Mpesa
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let phone = request
            .customer
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GatewayError::ValidationError {
                message: "phone number is required for M-Pesa".to_string(),
                field: Some("phone".to_string()),
            })?;
        let (Some(shortcode), Some(passkey)) =
            (self.config.shortcode.as_deref(), self.config.passkey.as_deref())
        else {
            return Err(GatewayError::unavailable(
                PROVIDER,
                "MPESA_SHORTCODE and MPESA_PASSKEY are required",
            ));
        };
        // STK push only takes whole shillings
        let amount = request
            .amount
            .amount
            .round(0)
            .to_i64()
            .filter(|a| *a > 0)
            .ok_or_else(|| GatewayError::ValidationError {
                message: "amount must be at least 1 after rounding".to_string(),
                field: Some("amount".to_string()),
            })?;

        let token = self.access_token().await?;
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let phone = Self::normalize_phone(phone);

        let payload = json!({
            "BusinessShortCode": shortcode,
            "Password": Self::password(shortcode, passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.order_reference,
            "TransactionDesc": format!("Payment for order {}", request.order_reference),
        });

        let reply = self
            .http
            .post_json(
                &self.endpoint("/mpesa/stkpush/v1/processrequest"),
                Auth::Bearer(&token),
                &payload,
                &[],
            )
            .await?;

        let response_code = reply.body.get("ResponseCode").and_then(|v| v.as_str());
        let checkout_id = reply
            .body
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let checkout_id = match (response_code, checkout_id) {
            (Some("0"), Some(id)) => id,
            _ => {
                return Err(GatewayError::GatewayRejected {
                    provider: PROVIDER.to_string(),
                    message: reply
                        .body
                        .get("errorMessage")
                        .or_else(|| reply.body.get("ResponseDescription"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("STK push failed")
                        .to_string(),
                    provider_code: response_code.map(str::to_string),
                })
            }
        };

        info!(provider = PROVIDER, provider_ref = %checkout_id, "STK push sent");

        Ok(InitiateResponse {
            provider_reference: checkout_id,
            action: UserAction::PushToDevice {
                instructions: "Check your phone for the M-Pesa payment prompt and enter your PIN"
                    .to_string(),
            },
            raw: reply.body,
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
            .map_err(|e| GatewayError::malformed(format!("invalid M-Pesa callback: {}", e)))?;
        let envelope: StkEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::malformed(format!("invalid M-Pesa callback: {}", e)))?;
        let callback = envelope.body.stk_callback;

        let outcome = if callback.result_code == 0 {
            ConfirmationOutcome::Succeeded
        } else {
            ConfirmationOutcome::Failed
        };

        Ok(CallbackEvent {
            provider_reference: callback.checkout_request_id,
            outcome: Some(outcome),
            reason: callback.result_desc,
            event_type: format!("stk_callback.{}", callback.result_code),
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["KES"]
    }
}

#[derive(Debug, Deserialize)]
struct StkEnvelope {
    #[serde(rename = "Body")]
    body: StkBody,
}

#[derive(Debug, Deserialize)]
struct StkBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc")]
    result_desc: Option<String>,
}

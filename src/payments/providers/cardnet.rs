//! Card-network processor (payment intents with 3-D Secure)

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CallbackEvent, ConfirmContext, InitiateRequest, InitiateResponse, ProviderName,
    ProviderStatus, RefundRequest, RefundResponse, StatusResponse, UserAction,
};
use crate::payments::utils::{
    parse_timestamped_signature, verify_hmac_sha256_hex, Auth, GatewayHttpClient,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "cardnet";

#[derive(Debug, Clone)]
pub struct CardnetConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub return_url: Option<String>,
    pub timeout_secs: u64,
    /// Maximum age of a signed callback
    pub signature_tolerance_secs: i64,
}

impl Default for CardnetConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            base_url: "https://api.cardnet.example".to_string(),
            return_url: None,
            timeout_secs: 30,
            signature_tolerance_secs: 300,
        }
    }
}

impl CardnetConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret_key: non_empty_env("CARDNET_SECRET_KEY"),
            webhook_secret: non_empty_env("CARDNET_WEBHOOK_SECRET"),
            base_url: non_empty_env("CARDNET_BASE_URL").unwrap_or(defaults.base_url),
            return_url: non_empty_env("CARDNET_RETURN_URL"),
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            signature_tolerance_secs: defaults.signature_tolerance_secs,
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub struct CardnetProvider {
    config: CardnetConfig,
    http: GatewayHttpClient,
}

impl CardnetProvider {
    pub fn new(config: CardnetConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(CardnetConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn secret_key(&self) -> GatewayResult<&str> {
        self.config
            .secret_key
            .as_deref()
            .ok_or_else(|| GatewayError::unavailable(PROVIDER, "CARDNET_SECRET_KEY is not configured"))
    }

    fn map_intent_status(status: &str) -> ProviderStatus {
        match status {
            "succeeded" => ProviderStatus::Succeeded,
            "processing" => ProviderStatus::Processing,
            "requires_payment_method" | "requires_confirmation" | "requires_action"
            | "requires_capture" => ProviderStatus::Pending,
            "canceled" => ProviderStatus::Cancelled,
            "payment_failed" => ProviderStatus::Failed,
            _ => ProviderStatus::Unknown,
        }
    }

    fn status_response(intent: JsonValue) -> GatewayResult<StatusResponse> {
        let parsed: PaymentIntent = serde_json::from_value(intent.clone())
            .map_err(|e| GatewayError::malformed(format!("invalid payment intent: {}", e)))?;
        Ok(StatusResponse {
            status: Self::map_intent_status(&parsed.status),
            failure_reason: parsed
                .last_payment_error
                .and_then(|e| e.message),
            provider_reference: parsed.id,
            raw: intent,
        })
    }
}

#[async_trait]
impl PaymentProvider for CardnetProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Cardnet
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let secret = self.secret_key()?;
        let minor_units = request.amount.minor_units().ok_or_else(|| GatewayError::ValidationError {
            message: "amount is out of range".to_string(),
            field: Some("amount".to_string()),
        })?;

        let payload = json!({
            "amount": minor_units,
            "currency": request.amount.currency.to_lowercase(),
            "description": request
                .description
                .clone()
                .unwrap_or_else(|| format!("Order {}", request.order_reference)),
            "confirmation_method": "manual",
            "payment_method_options": {"card": {"request_three_d_secure": "automatic"}},
            "receipt_email": request.customer.email,
            "metadata": {
                "order_ref": request.order_reference,
                "payment_ref": request.payment_reference,
            },
        });

        let reply = self
            .http
            .post_json(&self.endpoint("/v1/payment_intents"), Auth::Bearer(secret), &payload, &[])
            .await?;
        let intent: PaymentIntent = serde_json::from_value(reply.body.clone()).map_err(|e| {
            GatewayError::GatewayRejected {
                provider: PROVIDER.to_string(),
                message: format!("unexpected payment intent response: {}", e),
                provider_code: None,
            }
        })?;

        info!(provider = PROVIDER, provider_ref = %intent.id, "payment intent created");

        // The card form (hosted page) completes the intent with the client secret
        let url = intent
            .next_action
            .as_ref()
            .and_then(|a| a.redirect_to_url.as_ref())
            .map(|r| r.url.clone())
            .or_else(|| {
                request
                    .return_url
                    .clone()
                    .or_else(|| self.config.return_url.clone())
                    .map(|base| format!("{}?payment_intent={}", base, intent.id))
            });
        let action = match url {
            Some(url) => UserAction::Redirect { url },
            None => UserAction::Poll,
        };

        Ok(InitiateResponse {
            provider_reference: intent.id,
            action,
            raw: reply.body,
        })
    }

    async fn confirm(
        &self,
        provider_reference: &str,
        _context: ConfirmContext,
    ) -> GatewayResult<StatusResponse> {
        let secret = self.secret_key()?;
        let path = format!("/v1/payment_intents/{}", provider_reference);
        let reply = self
            .http
            .get(&self.endpoint(&path), Auth::Bearer(secret), &[])
            .await?;

        let still_needs_confirmation =
            reply.body.get("status").and_then(|s| s.as_str()) == Some("requires_confirmation");
        if !still_needs_confirmation {
            return Self::status_response(reply.body);
        }

        let reply = self
            .http
            .post_json(
                &self.endpoint(&format!("{}/confirm", path)),
                Auth::Bearer(secret),
                &json!({}),
                &[],
            )
            .await?;
        Self::status_response(reply.body)
    }

    async fn query_status(&self, _provider_reference: &str) -> GatewayResult<StatusResponse> {
        Err(GatewayError::unsupported(PROVIDER, "query_status"))
    }

    fn supports_status_polling(&self) -> bool {
        false
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let secret = self.secret_key()?;
        let minor_units = request.amount.minor_units().ok_or_else(|| GatewayError::ValidationError {
            message: "refund amount is out of range".to_string(),
            field: Some("amount".to_string()),
        })?;

        let payload = json!({
            "payment_intent": request.provider_reference,
            "amount": minor_units,
            "reason": "requested_by_customer",
            "metadata": {"reason": request.reason},
        });

        let reply = self
            .http
            .post_json(&self.endpoint("/v1/refunds"), Auth::Bearer(secret), &payload, &[])
            .await
            .map_err(|e| match e {
                GatewayError::GatewayRejected { message, .. } => GatewayError::RefundRejected {
                    provider: PROVIDER.to_string(),
                    message,
                },
                other => other,
            })?;

        let refund_reference = reply
            .body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::RefundRejected {
                provider: PROVIDER.to_string(),
                message: "refund response carried no id".to_string(),
            })?
            .to_string();
        if reply.body.get("status").and_then(|v| v.as_str()) == Some("failed") {
            return Err(GatewayError::RefundRejected {
                provider: PROVIDER.to_string(),
                message: format!("refund {} failed", refund_reference),
            });
        }

        Ok(RefundResponse {
            refund_reference,
            raw: reply.body,
        })
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> GatewayResult<()> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Err(GatewayError::InvalidSignature {
                message: "CARDNET_WEBHOOK_SECRET is not configured".to_string(),
            });
        };
        let header = signature.ok_or_else(|| GatewayError::InvalidSignature {
            message: "missing signature header".to_string(),
        })?;
        let parsed = parse_timestamped_signature(header).ok_or_else(|| {
            GatewayError::InvalidSignature {
                message: "unparseable signature header".to_string(),
            }
        })?;

        let skew = chrono::Utc::now().timestamp().abs_diff(parsed.timestamp);
        if skew > self.config.signature_tolerance_secs.unsigned_abs() {
            return Err(GatewayError::InvalidSignature {
                message: "signature timestamp outside tolerance".to_string(),
            });
        }

        let mut signed = format!("{}.", parsed.timestamp).into_bytes();
        signed.extend_from_slice(payload);
        if parsed
            .signatures
            .iter()
            .any(|candidate| verify_hmac_sha256_hex(&signed, secret, candidate))
        {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature {
                message: "signature mismatch".to_string(),
            })
        }
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        let event: CardnetEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(format!("invalid cardnet event: {}", e)))?;
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(e.to_string()))?;

        let object = event.data.object;
        let outcome = match event.event_type.as_str() {
            "payment_intent.succeeded" => Some(ConfirmationOutcome::Succeeded),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                Some(ConfirmationOutcome::Failed)
            }
            "payment_intent.processing" | "payment_intent.requires_action" => {
                Some(ConfirmationOutcome::Pending)
            }
            _ => None,
        };

        Ok(CallbackEvent {
            provider_reference: object.id,
            outcome,
            reason: object
                .last_payment_error
                .and_then(|e| e.message)
                .or(object.cancellation_reason),
            event_type: event.event_type,
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "CAD", "AUD", "KES", "NGN"]
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    next_action: Option<NextAction>,
    last_payment_error: Option<PaymentErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    redirect_to_url: Option<RedirectToUrl>,
}

#[derive(Debug, Deserialize)]
struct RedirectToUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardnetEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: CardnetEventData,
}

#[derive(Debug, Deserialize)]
struct CardnetEventData {
    object: CardnetEventObject,
}

#[derive(Debug, Deserialize)]
struct CardnetEventObject {
    id: String,
    last_payment_error: Option<PaymentErrorDetail>,
    cancellation_reason: Option<String>,
}

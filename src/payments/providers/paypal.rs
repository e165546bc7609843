//! PayPal REST redirect flow: create, payer approval, execute

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::cardnet::non_empty_env;
use crate::payments::types::{
    CallbackEvent, ConfirmContext, InitiateRequest, InitiateResponse, ProviderName,
    ProviderStatus, RefundRequest, RefundResponse, StatusResponse, UserAction,
};
use crate::payments::utils::{form_encode, Auth, Body, GatewayHttpClient};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "paypal";

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub base_url: String,
    pub return_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base_url: "https://api-m.sandbox.paypal.com".to_string(),
            return_url: "http://localhost:8000/payments/paypal/return".to_string(),
            cancel_url: "http://localhost:8000/payments/paypal/cancel".to_string(),
            timeout_secs: 30,
        }
    }
}

impl PayPalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = match std::env::var("PAYPAL_MODE").as_deref() {
            Ok("live") => "https://api-m.paypal.com".to_string(),
            _ => defaults.base_url,
        };
        Self {
            client_id: non_empty_env("PAYPAL_CLIENT_ID"),
            client_secret: non_empty_env("PAYPAL_CLIENT_SECRET"),
            base_url,
            return_url: non_empty_env("PAYPAL_RETURN_URL").unwrap_or(defaults.return_url),
            cancel_url: non_empty_env("PAYPAL_CANCEL_URL").unwrap_or(defaults.cancel_url),
            timeout_secs: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

pub struct PayPalProvider {
    config: PayPalConfig,
    http: GatewayHttpClient,
}

impl PayPalProvider {
    pub fn new(config: PayPalConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(PayPalConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> GatewayResult<String> {
        let (Some(client_id), Some(client_secret)) = (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
        ) else {
            return Err(GatewayError::unavailable(
                PROVIDER,
                "PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET are required",
            ));
        };

        let form = form_encode(&[("grant_type", "client_credentials")]);
        let reply = self
            .http
            .send(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                Auth::Basic {
                    username: client_id,
                    password: client_secret,
                },
                Body::Form(&form),
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

    pub(crate) fn map_state(state: &str) -> ProviderStatus {
        match state {
            "created" => ProviderStatus::Pending,
            "approved" => ProviderStatus::Processing,
            "completed" => ProviderStatus::Succeeded,
            "failed" => ProviderStatus::Failed,
            "canceled" | "cancelled" => ProviderStatus::Cancelled,
            "expired" => ProviderStatus::Expired,
            _ => ProviderStatus::Unknown,
        }
    }

    fn status_from_payment(payment: JsonValue) -> GatewayResult<StatusResponse> {
        let id = payment
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("payment response carried no id"))?
            .to_string();
        let state = payment.get("state").and_then(|v| v.as_str()).unwrap_or("");
        Ok(StatusResponse {
            status: Self::map_state(state),
            provider_reference: id,
            failure_reason: payment
                .get("failure_reason")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            raw: payment,
        })
    }

    fn sale_id(payment: &JsonValue) -> Option<String> {
        payment
            .pointer("/transactions/0/related_resources/0/sale/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::PayPal
    }

    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let token = self.access_token().await?;

        let total = request.amount.to_decimal_string();
        let description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Order {}", request.order_reference));
        let payload = json!({
            "intent": "sale",
            "payer": {"payment_method": "paypal"},
            "redirect_urls": {
                "return_url": request.return_url.clone().unwrap_or_else(|| self.config.return_url.clone()),
                "cancel_url": self.config.cancel_url,
            },
            "transactions": [{
                "item_list": {"items": [{
                    "name": description,
                    "sku": request.order_reference,
                    "price": total,
                    "currency": request.amount.currency,
                    "quantity": 1,
                }]},
                "amount": {"total": total, "currency": request.amount.currency},
                "description": description,
                "invoice_number": request.payment_reference,
            }],
        });

        let reply = self
            .http
            .post_json(&self.endpoint("/v1/payments/payment"), Auth::Bearer(&token), &payload, &[])
            .await?;

        let id = reply
            .body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::GatewayRejected {
                provider: PROVIDER.to_string(),
                message: "payment response carried no id".to_string(),
                provider_code: None,
            })?
            .to_string();
        let approval_url = reply
            .body
            .get("links")
            .and_then(|v| v.as_array())
            .and_then(|links| {
                links
                    .iter()
                    .find(|l| l.get("rel").and_then(|r| r.as_str()) == Some("approval_url"))
            })
            .and_then(|l| l.get("href"))
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::GatewayRejected {
                provider: PROVIDER.to_string(),
                message: "payment response carried no approval_url".to_string(),
                provider_code: None,
            })?;

        info!(provider = PROVIDER, provider_ref = %id, "payment created, awaiting approval");

        Ok(InitiateResponse {
            provider_reference: id,
            action: UserAction::Redirect { url: approval_url },
            raw: reply.body,
        })
    }

    async fn confirm(
        &self,
        provider_reference: &str,
        context: ConfirmContext,
    ) -> GatewayResult<StatusResponse> {
        let payer_id = context.payer_id.ok_or_else(|| GatewayError::ValidationError {
            message: "PayerID is required to execute a PayPal payment".to_string(),
            field: Some("PayerID".to_string()),
        })?;
        let token = self.access_token().await?;

        let reply = self
            .http
            .post_json(
                &self.endpoint(&format!("/v1/payments/payment/{}/execute", provider_reference)),
                Auth::Bearer(&token),
                &json!({"payer_id": payer_id}),
                &[],
            )
            .await?;
        Self::status_from_payment(reply.body)
    }

    async fn query_status(&self, provider_reference: &str) -> GatewayResult<StatusResponse> {
        let token = self.access_token().await?;
        let reply = self
            .http
            .get(
                &self.endpoint(&format!("/v1/payments/payment/{}", provider_reference)),
                Auth::Bearer(&token),
                &[],
            )
            .await?;
        Self::status_from_payment(reply.body)
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let token = self.access_token().await?;

        let payment = self
            .http
            .get(
                &self.endpoint(&format!("/v1/payments/payment/{}", request.provider_reference)),
                Auth::Bearer(&token),
                &[],
            )
            .await?;
        let sale_id = Self::sale_id(&payment.body).ok_or_else(|| GatewayError::RefundRejected {
            provider: PROVIDER.to_string(),
            message: "payment has no completed sale to refund".to_string(),
        })?;

        let payload = json!({
            "amount": {
                "total": request.amount.to_decimal_string(),
                "currency": request.amount.currency,
            },
            "description": request.reason,
        });
        let reply = self
            .http
            .post_json(
                &self.endpoint(&format!("/v1/payments/sale/{}/refund", sale_id)),
                Auth::Bearer(&token),
                &payload,
                &[],
            )
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

        Ok(RefundResponse {
            refund_reference,
            raw: reply.body,
        })
    }

    fn parse_callback(&self, payload: &[u8]) -> GatewayResult<CallbackEvent> {
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::malformed(format!("invalid paypal event: {}", e)))?;
        let event_type = raw
            .get("event_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("event_type is required"))?
            .to_string();

        // Sale events reference the payment through parent_payment
        let resource = raw.get("resource").cloned().unwrap_or(JsonValue::Null);
        let provider_reference = resource
            .get("parent_payment")
            .or_else(|| resource.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::malformed("resource.parent_payment is required"))?
            .to_string();

        let outcome = match event_type.as_str() {
            "PAYMENT.SALE.COMPLETED" => Some(ConfirmationOutcome::Succeeded),
            "PAYMENT.SALE.DENIED" | "PAYMENT.SALE.REVERSED" => Some(ConfirmationOutcome::Failed),
            "PAYMENT.SALE.PENDING" => Some(ConfirmationOutcome::Pending),
            _ => None,
        };

        Ok(CallbackEvent {
            provider_reference,
            outcome,
            reason: resource
                .get("reason_code")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            event_type,
            payload: raw,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "CAD", "AUD", "JPY"]
    }
}

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error;

use crate::database::models::ConfirmationOutcome;
use crate::payments::error::GatewayError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Cardnet,
    #[serde(rename = "paypal")]
    PayPal,
    Mpesa,
    #[serde(rename = "mtn")]
    MtnMomo,
    #[serde(rename = "bitpay")]
    BitPay,
    #[serde(rename = "coingate")]
    CoinGate,
}

/// Broad provider class, used to pick the user-facing flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Card,
    Redirect,
    MobileMoney,
    Crypto,
}

impl ProviderName {
    pub const ALL: [ProviderName; 6] = [
        ProviderName::Cardnet,
        ProviderName::PayPal,
        ProviderName::Mpesa,
        ProviderName::MtnMomo,
        ProviderName::BitPay,
        ProviderName::CoinGate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Cardnet => "cardnet",
            ProviderName::PayPal => "paypal",
            ProviderName::Mpesa => "mpesa",
            ProviderName::MtnMomo => "mtn",
            ProviderName::BitPay => "bitpay",
            ProviderName::CoinGate => "coingate",
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderName::Cardnet => ProviderFamily::Card,
            ProviderName::PayPal => ProviderFamily::Redirect,
            ProviderName::Mpesa | ProviderName::MtnMomo => ProviderFamily::MobileMoney,
            ProviderName::BitPay | ProviderName::CoinGate => ProviderFamily::Crypto,
        }
    }

    /// Mobile-money pushes need the payer's phone number up front.
    pub fn requires_phone(&self) -> bool {
        self.family() == ProviderFamily::MobileMoney
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported provider: {0}")]
pub struct ParseProviderError(pub String);

impl FromStr for ProviderName {
    type Err = ParseProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cardnet" | "card" | "stripe" => Ok(ProviderName::Cardnet),
            "paypal" => Ok(ProviderName::PayPal),
            "mpesa" | "m-pesa" | "mobile_mpesa" => Ok(ProviderName::Mpesa),
            "mtn" | "mtn_momo" | "mobile_mtn" => Ok(ProviderName::MtnMomo),
            "bitpay" | "crypto_bitpay" => Ok(ProviderName::BitPay),
            "coingate" | "crypto_coingate" => Ok(ProviderName::CoinGate),
            _ => Err(ParseProviderError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(GatewayError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().len() != 3 {
            return Err(GatewayError::ValidationError {
                message: format!("invalid currency code: {}", self.currency),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount in the currency's minor unit (cents), as card processors expect.
    pub fn minor_units(&self) -> Option<i64> {
        (&self.amount * BigDecimal::from(100)).round(0).to_i64()
    }

    /// Two-decimal string form used by PayPal and the crypto invoicing APIs.
    pub fn to_decimal_string(&self) -> String {
        self.amount.with_scale_round(2, bigdecimal::RoundingMode::HalfUp).to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub amount: Money,
    pub order_reference: String,
    pub payment_reference: String,
    pub description: Option<String>,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
}

/// What the payer has to do next to complete the payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAction {
    Redirect { url: String },
    Poll,
    PushToDevice { instructions: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub provider_reference: String,
    pub action: UserAction,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    Unknown,
}

impl ProviderStatus {
    /// Maps the provider-side state onto a confirmation outcome. `Refunded` and
    /// `Unknown` carry nothing the confirmation path can act on.
    pub fn outcome(&self) -> Option<ConfirmationOutcome> {
        match self {
            ProviderStatus::Pending | ProviderStatus::Processing => {
                Some(ConfirmationOutcome::Pending)
            }
            ProviderStatus::Succeeded => Some(ConfirmationOutcome::Succeeded),
            ProviderStatus::Failed | ProviderStatus::Cancelled | ProviderStatus::Expired => {
                Some(ConfirmationOutcome::Failed)
            }
            ProviderStatus::Refunded | ProviderStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ProviderStatus,
    pub provider_reference: String,
    pub failure_reason: Option<String>,
    pub raw: JsonValue,
}

/// Data handed back by the payer's browser on a synchronous return leg
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmContext {
    pub payer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub provider_reference: String,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub refund_reference: String,
    pub raw: JsonValue,
}

/// A provider callback normalized to the fields reconciliation needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub provider_reference: String,
    /// `None` for events that carry no payment outcome (e.g. informational pings)
    pub outcome: Option<ConfirmationOutcome>,
    pub reason: Option<String>,
    pub event_type: String,
    pub payload: JsonValue,
}

use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Credentials attached to an outbound provider call
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

/// Outbound request body
#[derive(Debug, Clone, Copy)]
pub enum Body<'a> {
    Empty,
    Json(&'a JsonValue),
    /// Pre-encoded `application/x-www-form-urlencoded` body
    Form(&'a str),
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: JsonValue,
}

/// Thin JSON client shared by the provider adapters.
///
/// Each call is one attempt bounded by `timeout`. Failures are mapped onto the
/// gateway taxonomy: transport problems, timeouts and 5xx become
/// `GatewayTransportError`; 401/403 mean the credentials are unusable
/// (`GatewayUnavailable`); any other 4xx is a `GatewayRejected` carrying the body.
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
}

impl GatewayHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                GatewayError::unavailable(provider, format!("failed to initialize HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: Body<'_>,
        headers: &[(&str, &str)],
    ) -> GatewayResult<HttpReply> {
        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

        request = match auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        for (k, v) in headers {
            request = request.header(*k, *v);
        }
        request = match body {
            Body::Empty => request,
            Body::Json(payload) => request.json(payload),
            Body::Form(encoded) => request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(encoded.to_string()),
        };

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out after {:?}", self.timeout)
            } else {
                format!("provider request failed: {}", e)
            };
            warn!(provider = self.provider, method = %method, error = %e, "provider request failed");
            GatewayError::transport(self.provider, message)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            GatewayError::transport(self.provider, format!("failed to read response body: {}", e))
        })?;
        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        };

        debug!(provider = self.provider, status = status.as_u16(), "provider responded");

        if status.is_success() {
            return Ok(HttpReply {
                status: status.as_u16(),
                body,
            });
        }

        match status.as_u16() {
            401 | 403 => Err(GatewayError::unavailable(
                self.provider,
                format!("credentials rejected (HTTP {})", status.as_u16()),
            )),
            code if status.is_client_error() => Err(GatewayError::GatewayRejected {
                provider: self.provider.to_string(),
                message: extract_error_message(&body).unwrap_or_else(|| format!("HTTP {}", code)),
                provider_code: extract_error_code(&body).or_else(|| Some(code.to_string())),
            }),
            code => Err(GatewayError::transport(
                self.provider,
                format!("provider server error (HTTP {})", code),
            )),
        }
    }

    pub async fn get(&self, url: &str, auth: Auth<'_>, headers: &[(&str, &str)]) -> GatewayResult<HttpReply> {
        self.send(reqwest::Method::GET, url, auth, Body::Empty, headers)
            .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        auth: Auth<'_>,
        payload: &JsonValue,
        headers: &[(&str, &str)],
    ) -> GatewayResult<HttpReply> {
        self.send(reqwest::Method::POST, url, auth, Body::Json(payload), headers)
            .await
    }
}

fn extract_error_message(body: &JsonValue) -> Option<String> {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .or_else(|| body.get("error_description"))
        .or_else(|| body.get("errorMessage"))
        .or_else(|| body.get("error").filter(|v| v.is_string()))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
}

fn extract_error_code(body: &JsonValue) -> Option<String> {
    body.pointer("/error/code")
        .or_else(|| body.get("name"))
        .or_else(|| body.get("errorCode"))
        .or_else(|| body.get("code"))
        .and_then(|v| match v {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Encodes key/value pairs as an `application/x-www-form-urlencoded` body.
pub fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

/// Parsed `t=<unix>,v1=<hex>` signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

pub fn parse_timestamped_signature(header: &str) -> Option<TimestampedSignature> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Some(TimestampedSignature {
            timestamp,
            signatures,
        }),
        _ => None,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_round_trip() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let signature = hmac_sha256_hex(payload, "whsec").unwrap();
        assert!(verify_hmac_sha256_hex(payload, "whsec", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "whsec", "not-a-valid-signature"));
        assert!(!verify_hmac_sha256_hex(payload, "other", &signature));
    }

    #[test]
    fn parses_timestamped_signature_header() {
        let parsed = parse_timestamped_signature("t=1700000000,v1=abc,v1=def").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.signatures, vec!["abc".to_string(), "def".to_string()]);
        assert!(parse_timestamped_signature("v1=abc").is_none());
        assert!(parse_timestamped_signature("garbage").is_none());
    }

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        assert_eq!(
            form_encode(&[("grant_type", "client_credentials"), ("note", "a b&c")]),
            "grant_type=client_credentials&note=a+b%26c"
        );
    }

    #[test]
    fn error_details_are_extracted_from_common_shapes() {
        let body = serde_json::json!({"error": {"message": "Your card was declined.", "code": "card_declined"}});
        assert_eq!(
            extract_error_message(&body).as_deref(),
            Some("Your card was declined.")
        );
        assert_eq!(extract_error_code(&body).as_deref(), Some("card_declined"));

        let body = serde_json::json!({"name": "VALIDATION_ERROR", "message": "Invalid request"});
        assert_eq!(extract_error_code(&body).as_deref(), Some("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let client = GatewayHttpClient::new("cardnet", Duration::from_millis(500)).unwrap();
        let err = client
            .get("http://127.0.0.1:1/v1/payment_intents/pi_1", Auth::None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::GatewayTransportError { .. }));
    }
}

//! Logging and tracing configuration
//!
//! Structured JSON logs in production, human-readable output in development.
//! Provider payloads pass through [`redact_sensitive_data`] before they are
//! logged, since callbacks carry phone numbers, emails and client secrets.

use regex::Regex;
use std::env;
use std::sync::LazyLock;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment types for logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from ENV variable
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Get default log level for environment
    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging", or "development"
/// - `RUST_LOG`: Override the filter (e.g., "info", "paybridge_backend=debug")
/// - `LOG_FORMAT`: Force format to "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    // Default filter: our crate at the environment level, dependencies quieter
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http=info,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            environment.default_log_level()
        ))
    });

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask a phone number, keeping only the last 3 digits
pub fn mask_phone_number(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 3 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 3..].iter().collect();
    format!("***{}", tail)
}

/// Mask an email address, keeping the first character and the domain
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            format!("{}***@{}", &local[..local.chars().next().map_or(0, char::len_utf8)], domain)
        }
        _ => "***".to_string(),
    }
}

const SENSITIVE_KEYS: &[&str] = &[
    "secret",
    "client_secret",
    "password",
    "Password",
    "token",
    "access_token",
    "api_key",
    "apiKey",
    "authorization",
    "PhoneNumber",
    "phone",
    "partyId",
    "email",
];

static SENSITIVE_PATTERNS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    SENSITIVE_KEYS
        .iter()
        .filter_map(|key| {
            // "key": "value" or "key": 12345
            let pattern = format!(r#""{}"\s*:\s*("[^"]*"|\d+)"#, regex::escape(key));
            Regex::new(&pattern)
                .ok()
                .map(|re| (re, format!(r#""{}": "[REDACTED]""#, key)))
        })
        .collect()
});

/// Redact sensitive fields from JSON text before it reaches the logs
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in SENSITIVE_PATTERNS.iter() {
        result = re.replace_all(&result, replacement.as_str()).to_string();
    }
    result
}

/// Log a payment lifecycle event with consistent structure
#[macro_export]
macro_rules! log_payment_event {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "payment",
            $($key = tracing::field::display(&$value)),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert!(Environment::parse("prod").is_production());
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
    }

    #[test]
    fn test_mask_phone_number() {
        assert_eq!(mask_phone_number("+254 712 345 678"), "***678");
        assert_eq!(mask_phone_number("12"), "***");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"client_secret": "pi_123_secret_abc", "PhoneNumber": 254712345678, "amount": 50}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("pi_123_secret_abc"));
        assert!(!redacted.contains("254712345678"));
        assert!(redacted.contains("\"amount\": 50"));
    }
}

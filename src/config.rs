//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use bigdecimal::BigDecimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::rate_limiter::{ActionClass, RateLimitRule};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentLimitsConfig,
    pub rate_limits: RateLimitConfig,
    pub receipts: ReceiptConfig,
    pub admin: AdminConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration. Without a URL the service runs on the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration. Without a URL rate limiting stays in-process.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Order amount bounds and provider call settings
#[derive(Debug, Clone)]
pub struct PaymentLimitsConfig {
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
    pub default_currency: String,
    pub provider_timeout: Duration,
}

/// Sliding-window limits per action class
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub payment_initiation: RateLimitRule,
    pub support_ticket: RateLimitRule,
    pub default: RateLimitRule,
}

#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    pub directory: String,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub api_token: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payments: PaymentLimitsConfig::from_env()?,
            rate_limits: RateLimitConfig::from_env()?,
            receipts: ReceiptConfig::from_env(),
            admin: AdminConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.payments.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigError::InvalidValue(
                    "DATABASE_URL must start with postgres://".to_string(),
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidValue(
                    "REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for PaymentLimitsConfig {
    fn default() -> Self {
        Self {
            min_amount: BigDecimal::from(1),
            max_amount: BigDecimal::from(10_000),
            default_currency: "USD".to_string(),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

impl PaymentLimitsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            min_amount: decimal_var("MIN_PAYMENT_AMOUNT", defaults.min_amount)?,
            max_amount: decimal_var("MAX_PAYMENT_AMOUNT", defaults.max_amount)?,
            default_currency: env::var("DEFAULT_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.default_currency),
            provider_timeout: Duration::from_secs(
                env::var("PAYMENT_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PAYMENT_TIMEOUT_SECS".to_string()))?,
            ),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_amount <= BigDecimal::from(0) {
            return Err(ConfigError::ValidationFailed(
                "MIN_PAYMENT_AMOUNT must be positive".to_string(),
            ));
        }

        if self.min_amount > self.max_amount {
            return Err(ConfigError::ValidationFailed(
                "MIN_PAYMENT_AMOUNT must be <= MAX_PAYMENT_AMOUNT".to_string(),
            ));
        }

        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue("DEFAULT_CURRENCY".to_string()));
        }

        if self.provider_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("PAYMENT_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            payment_initiation: ActionClass::PaymentInitiation.default_rule(),
            support_ticket: ActionClass::SupportTicket.default_rule(),
            default: ActionClass::Default.default_rule(),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            payment_initiation: rule_var("RATE_LIMIT_PAYMENT", defaults.payment_initiation)?,
            support_ticket: rule_var("RATE_LIMIT_SUPPORT", defaults.support_ticket)?,
            default: rule_var("RATE_LIMIT_DEFAULT", defaults.default)?,
        })
    }

    pub fn rule_for(&self, action: ActionClass) -> RateLimitRule {
        match action {
            ActionClass::PaymentInitiation => self.payment_initiation,
            ActionClass::SupportTicket => self.support_ticket,
            ActionClass::Default => self.default,
        }
    }
}

impl ReceiptConfig {
    pub fn from_env() -> Self {
        Self {
            directory: env::var("RECEIPTS_DIR").unwrap_or_else(|_| "receipts".to_string()),
        }
    }
}

impl AdminConfig {
    pub fn from_env() -> Self {
        Self {
            api_token: env::var("ADMIN_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

fn decimal_var(name: &str, default: BigDecimal) -> Result<BigDecimal, ConfigError> {
    match env::var(name) {
        Ok(raw) => BigDecimal::from_str(raw.trim())
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn rule_var(name: &str, default: RateLimitRule) -> Result<RateLimitRule, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_rule(&raw).ok_or_else(|| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

/// Parses `"<max_requests>/<window_seconds>"`, e.g. `"5/300"`.
pub fn parse_rule(raw: &str) -> Option<RateLimitRule> {
    let (max, window) = raw.trim().split_once('/')?;
    let max_requests: usize = max.trim().parse().ok()?;
    let window_secs: u64 = window.trim().parse().ok()?;
    if max_requests == 0 || window_secs == 0 {
        return None;
    }
    Some(RateLimitRule {
        max_requests,
        window: Duration::from_secs(window_secs),
    })
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::processor::ProcessorEnvironment;

/// Main configuration structure for payflux
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            processor: ProcessorConfig::default(),
            billing: BillingConfig::default(),
            webhook: WebhookConfig::default(),
            ratelimit: RateLimitConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        // Try to load from PAYFLUX_CONFIG env var first
        if let Ok(config_path) = std::env::var("PAYFLUX_CONFIG") {
            return Self::load(&config_path);
        }

        // Try default locations
        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/payflux/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.billing.retry_delay_days.is_empty() {
            return Err(Error::Config("billing.retry_delay_days must not be empty".to_string()));
        }

        if self.billing.max_retry_attempts as usize > self.billing.retry_delay_days.len() {
            return Err(Error::Config(format!(
                "billing.retry_delay_days needs at least {} entries",
                self.billing.max_retry_attempts
            )));
        }

        if self.webhook.retry.multiplier < 1.0 {
            return Err(Error::Config("webhook.retry.multiplier must be >= 1.0".to_string()));
        }

        if self.processor.environment == ProcessorEnvironment::Production
            && (self.processor.api_login_id.is_empty() || self.processor.transaction_key.is_empty())
        {
            return Err(Error::Config(
                "processor credentials are required in production".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/payflux".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Processor connection settings. The environment is bound at adapter
/// construction; there is no process-wide switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub environment: ProcessorEnvironment,

    #[serde(default)]
    pub api_login_id: String,

    #[serde(default)]
    pub transaction_key: String,

    #[serde(default = "default_processor_timeout")]
    pub timeout_seconds: u64,

    /// Shared secret for inbound webhook signature verification
    #[serde(default)]
    pub webhook_signature_key: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            environment: ProcessorEnvironment::Sandbox,
            api_login_id: String::new(),
            transaction_key: String::new(),
            timeout_seconds: default_processor_timeout(),
            webhook_signature_key: String::new(),
        }
    }
}

fn default_processor_timeout() -> u64 {
    30
}

/// Recurring billing, dunning, and proration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Number of payment attempts before an invoice is abandoned
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: i32,

    /// Days to wait before each retry, indexed by prior attempt count
    #[serde(default = "default_retry_delay_days")]
    pub retry_delay_days: Vec<i64>,

    /// Days after creation until a recurring invoice is due
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,

    /// Per-customer charges allowed within the velocity window
    #[serde(default = "default_velocity_limit")]
    pub velocity_limit_per_hour: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_days: default_retry_delay_days(),
            grace_period_days: default_grace_period_days(),
            velocity_limit_per_hour: default_velocity_limit(),
        }
    }
}

fn default_max_retry_attempts() -> i32 {
    5
}

fn default_retry_delay_days() -> Vec<i64> {
    vec![1, 3, 7, 14, 30]
}

fn default_grace_period_days() -> i64 {
    3
}

fn default_velocity_limit() -> i64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Inbound events with the same (event_id, event_type) inside this
    /// window are dropped as duplicates
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_minutes: i64,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_webhook_max_attempts")]
    pub max_attempts: i32,

    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,

    /// Merchant endpoints that receive outbound state-change events
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub retry: WebhookRetryConfig,

    #[serde(default)]
    pub cleanup: WebhookCleanupConfig,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            duplicate_window_minutes: default_duplicate_window(),
            timeout_seconds: default_webhook_timeout(),
            max_attempts: default_webhook_max_attempts(),
            delivery_concurrency: default_delivery_concurrency(),
            endpoints: Vec::new(),
            retry: WebhookRetryConfig::default(),
            cleanup: WebhookCleanupConfig::default(),
        }
    }
}

fn default_duplicate_window() -> i64 {
    60
}

fn default_webhook_timeout() -> u64 {
    30
}

fn default_webhook_max_attempts() -> i32 {
    10
}

fn default_delivery_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRetryConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_minutes: i64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_minutes: i64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for WebhookRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_minutes: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_minutes: default_max_delay(),
            jitter: default_true(),
        }
    }
}

fn default_initial_delay() -> i64 {
    1
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> i64 {
    1440
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCleanupConfig {
    #[serde(default = "default_delivered_retention")]
    pub delivered_retention_days: i64,

    #[serde(default = "default_failed_retention")]
    pub failed_retention_days: i64,
}

impl Default for WebhookCleanupConfig {
    fn default() -> Self {
        Self {
            delivered_retention_days: default_delivered_retention(),
            failed_retention_days: default_failed_retention(),
        }
    }
}

fn default_delivered_retention() -> i64 {
    7
}

fn default_failed_retention() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_per_hour")]
    pub default_per_hour: i64,

    #[serde(default = "default_burst")]
    pub burst: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_per_hour: default_per_hour(),
            burst: default_burst(),
        }
    }
}

fn default_per_hour() -> i64 {
    1000
}

fn default_burst() -> i64 {
    1000
}

/// Token lifetimes consumed by the external auth layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_ms: u64,

    #[serde(default = "default_jwt_refresh_expiration")]
    pub jwt_refresh_expiration_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_expiration_ms: default_jwt_expiration(),
            jwt_refresh_expiration_ms: default_jwt_refresh_expiration(),
        }
    }
}

fn default_jwt_expiration() -> u64 {
    3_600_000
}

fn default_jwt_refresh_expiration() -> u64 {
    86_400_000
}

use serde::{Deserialize, Serialize};

/// Main error type for payflux
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database errors (SQLx wrapped)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP/Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payment processing errors
    #[error("Payment error: {0}")]
    Payment(String),

    /// The processor declined the payment
    #[error("Payment declined ({code}): {reason}")]
    Declined { code: String, reason: String },

    /// Invalid amount for a capture/refund
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The same idempotency key was used with a different request
    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    /// Webhook signature could not be verified
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Request rejected by the rate limiter
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with description
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

// Conversions from external error types
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new payment error
    pub fn payment<T: Into<String>>(msg: T) -> Self {
        Error::Payment(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }

    /// Create a new invalid amount error
    pub fn invalid_amount<T: Into<String>>(msg: T) -> Self {
        Error::InvalidAmount(msg.into())
    }

    /// Create a new idempotency conflict error
    pub fn idempotency_conflict<T: Into<String>>(msg: T) -> Self {
        Error::IdempotencyConflict(msg.into())
    }

    /// Create a new signature error
    pub fn signature<T: Into<String>>(msg: T) -> Self {
        Error::Signature(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::InvalidAmount(_) => 400,
            Error::NotFound(_) => 404,
            Error::Declined { .. } => 402,
            Error::Payment(_) => 402,
            Error::IdempotencyConflict(_) => 409,
            Error::Signature(_) => 401,
            Error::RateLimited { .. } => 429,
            Error::Network(_) => 503,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Network(_) => "network",
            Error::Validation(_) => "validation",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::NotFound(_) => "not_found",
            Error::Payment(_) => "payment",
            Error::Declined { .. } => "declined",
            Error::IdempotencyConflict(_) => "idempotency_conflict",
            Error::Signature(_) => "signature",
            Error::RateLimited { .. } => "rate_limited",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// Whether the underlying failure is worth retrying at all
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Database(_))
    }
}

/// Validation error struct for detailed field errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_error(self) -> Error {
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Error::Validation(summary)
    }
}

impl Default for ValidationErrors {
    fn default() -> Self {
        Self::new()
    }
}

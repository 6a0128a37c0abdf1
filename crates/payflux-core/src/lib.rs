pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod payment;
pub mod processor;
pub mod ratelimit;
pub mod repository;
pub mod webhooks;

// Re-export commonly used types
pub use config::{BillingConfig, Config, ProcessorConfig, RateLimitConfig, WebhookConfig};
pub use db::{create_pool, migrate};
pub use error::{Error, Result, ValidationErrors};
pub use models::{
    Currency, Customer, IntervalUnit, InvoiceStatus, InvoiceType, Pagination, PaymentMethod,
    PaymentStatus, Subscription, SubscriptionInvoice, SubscriptionPlan, SubscriptionStatus,
    Transaction, TransactionType, Webhook, WebhookStatus,
};
pub use billing::{BillingScheduler, ProrationCalculator, SubscriptionEngine};
pub use payment::{PaymentOrchestrator, PaymentRequest, PaymentResponse};
pub use processor::{AuthorizeNetAdapter, Outcome, ProcessorAdapter, ProcessorEnvironment};
pub use ratelimit::{PostgresRateStore, RateDecision, RateLimiter, RateStore};
pub use webhooks::{InboundProcessor, OutboundDispatcher, SignatureVerifier};

/// Current version of payflux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Repository module for database access
//!
//! One trait per aggregate with a PostgreSQL implementation. Traits are
//! object safe so services can hold `Arc<dyn ...>` and tests can supply
//! in-memory fakes.

pub mod customer_repository;
pub mod idempotency_repository;
pub mod invoice_repository;
pub mod order_repository;
pub mod plan_repository;
pub mod subscription_repository;
pub mod transaction_repository;
pub mod webhook_repository;

pub use customer_repository::{CustomerRepository, PostgresCustomerRepository};
pub use idempotency_repository::{
    request_fingerprint, ClaimOutcome, IdempotencyScope, IdempotencyStore,
    PostgresIdempotencyStore,
};
pub use invoice_repository::{InvoiceRepository, PostgresInvoiceRepository};
pub use order_repository::{OrderRepository, PostgresOrderRepository};
pub use plan_repository::{PlanRepository, PostgresPlanRepository};
pub use subscription_repository::{PostgresSubscriptionRepository, SubscriptionRepository};
pub use transaction_repository::{PostgresTransactionRepository, TransactionRepository};
pub use webhook_repository::{NewWebhook, PostgresWebhookRepository, WebhookRepository};

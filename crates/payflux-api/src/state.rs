//! Shared application state wiring the core services together

use sqlx::PgPool;
use std::sync::Arc;

use payflux_core::billing::{BillingScheduler, SubscriptionEngine};
use payflux_core::config::Config;
use payflux_core::payment::PaymentOrchestrator;
use payflux_core::processor::{AuthorizeNetAdapter, ProcessorAdapter};
use payflux_core::ratelimit::{PostgresRateStore, RateLimiter};
use payflux_core::repository::{
    CustomerRepository, OrderRepository, PlanRepository, PostgresCustomerRepository,
    PostgresIdempotencyStore, PostgresInvoiceRepository, PostgresOrderRepository,
    PostgresPlanRepository, PostgresSubscriptionRepository, PostgresTransactionRepository,
    PostgresWebhookRepository, TransactionRepository,
};
use payflux_core::webhooks::{
    BreakerConfig, CircuitBreakerRegistry, InboundProcessor, OutboundDispatcher, SignatureVerifier,
};
use payflux_core::Result;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub engine: Arc<SubscriptionEngine>,
    pub scheduler: Arc<BillingScheduler>,
    pub plans: Arc<dyn PlanRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub processor: Arc<dyn ProcessorAdapter>,
    pub inbound: Arc<InboundProcessor>,
    pub outbound: Arc<OutboundDispatcher>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build every service over the shared pool
    pub fn new(pool: PgPool, config: Config) -> Result<Self> {
        let customers = Arc::new(PostgresCustomerRepository::new(pool.clone()));
        let transactions = Arc::new(PostgresTransactionRepository::new(pool.clone()));
        let subscriptions = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
        let invoices = Arc::new(PostgresInvoiceRepository::new(pool.clone()));
        let plans: Arc<dyn PlanRepository> = Arc::new(PostgresPlanRepository::new(pool.clone()));
        let webhooks = Arc::new(PostgresWebhookRepository::new(pool.clone()));
        let idempotency = Arc::new(PostgresIdempotencyStore::new(pool.clone()));

        let processor = Arc::new(AuthorizeNetAdapter::new(&config.processor)?);

        let breaker = Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default()));
        let outbound = Arc::new(OutboundDispatcher::new(
            webhooks.clone(),
            breaker,
            config.webhook.clone(),
        )?);

        let orchestrator = Arc::new(
            PaymentOrchestrator::new(
                processor.clone(),
                customers.clone(),
                transactions.clone(),
                idempotency,
                config.billing.clone(),
            )
            .with_events(outbound.clone()),
        );

        let engine = Arc::new(SubscriptionEngine::new(
            subscriptions.clone(),
            plans.clone(),
            invoices.clone(),
            customers.clone(),
            processor.clone(),
            config.billing.clone(),
        ));

        let scheduler = Arc::new(BillingScheduler::new(
            engine.clone(),
            orchestrator.clone(),
            subscriptions,
            invoices,
            customers.clone(),
            transactions.clone(),
            config.billing.clone(),
        ));

        let verifier = SignatureVerifier::new(&config.processor.webhook_signature_key);
        let inbound = Arc::new(InboundProcessor::new(
            webhooks,
            transactions.clone(),
            verifier,
            config.webhook.clone(),
        ));

        let orders: Arc<dyn OrderRepository> = Arc::new(PostgresOrderRepository::new(pool.clone()));

        let limiter = Arc::new(RateLimiter::new(
            Arc::new(PostgresRateStore::new(pool)),
            config.ratelimit.clone(),
        ));

        Ok(Self {
            orchestrator,
            engine,
            scheduler,
            plans,
            customers,
            orders,
            transactions,
            processor,
            inbound,
            outbound,
            limiter,
            config: Arc::new(config),
        })
    }
}

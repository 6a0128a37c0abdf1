//! Webhook ingestion and delivery
//!
//! Inbound: signature-verified processor events reconcile transaction state
//! with duplicate suppression. Outbound: a retrying delivery queue with
//! exponential backoff and per-endpoint circuit breakers.

pub mod breaker;
pub mod inbound;
pub mod outbound;
pub mod signature;

pub use breaker::{BreakerConfig, BreakerDecision, CircuitBreakerRegistry};
pub use inbound::{InboundOutcome, InboundProcessor};
pub use outbound::{DeliveryStats, OutboundDispatcher};
pub use signature::SignatureVerifier;

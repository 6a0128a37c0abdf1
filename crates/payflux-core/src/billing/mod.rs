//! Recurring billing: proration arithmetic, the subscription lifecycle
//! engine, and the scheduler sweeps that drive them.

pub mod engine;
pub mod proration;
pub mod scheduler;

pub use engine::{advance, SubscriptionEngine};
pub use proration::{ProrationCalculator, ProrationResult, ProrationType};
pub use scheduler::{AttemptOutcome, BillingScheduler, SweepStats};

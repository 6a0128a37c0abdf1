//! Per-endpoint circuit breaker for outbound delivery
//!
//! State is in-process only; nodes trip independently and no cross-node
//! coordination is required.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// What the caller should do with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Endpoint is healthy, deliver normally
    Allow,
    /// Breaker just moved to half-open; this delivery is the probe
    Probe,
    /// Breaker is open, skip and reschedule
    Skip,
}

pub struct CircuitBreakerRegistry {
    states: DashMap<String, State>,
    config: BreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self { states: DashMap::new(), config }
    }

    /// Decide whether a delivery to `endpoint` may proceed
    pub fn check(&self, endpoint: &str) -> BreakerDecision {
        let mut entry = self
            .states
            .entry(endpoint.to_string())
            .or_insert(State::Closed { consecutive_failures: 0 });

        match *entry {
            State::Closed { .. } => BreakerDecision::Allow,
            State::Open { until } => {
                if Instant::now() >= until {
                    *entry = State::HalfOpen;
                    info!(endpoint, "circuit half-open, issuing probe");
                    BreakerDecision::Probe
                } else {
                    BreakerDecision::Skip
                }
            }
            // A probe is already in flight
            State::HalfOpen => BreakerDecision::Skip,
        }
    }

    /// Any success closes the breaker
    pub fn record_success(&self, endpoint: &str) {
        if let Some(mut entry) = self.states.get_mut(endpoint) {
            if !matches!(*entry, State::Closed { consecutive_failures: 0 }) {
                info!(endpoint, "circuit closed");
            }
            *entry = State::Closed { consecutive_failures: 0 };
        }
    }

    pub fn record_failure(&self, endpoint: &str) {
        let mut entry = self
            .states
            .entry(endpoint.to_string())
            .or_insert(State::Closed { consecutive_failures: 0 });

        *entry = match *entry {
            State::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(endpoint, failures, "circuit opened");
                    State::Open { until: Instant::now() + self.config.open_duration }
                } else {
                    State::Closed { consecutive_failures: failures }
                }
            }
            // Failed probe re-opens for a full window
            State::HalfOpen => {
                warn!(endpoint, "probe failed, circuit re-opened");
                State::Open { until: Instant::now() + self.config.open_duration }
            }
            open @ State::Open { .. } => open,
        };
    }

    /// Time until the breaker would allow a probe, if currently open
    pub fn retry_after(&self, endpoint: &str) -> Option<Duration> {
        self.states.get(endpoint).and_then(|entry| match *entry {
            State::Open { until } => Some(until.saturating_duration_since(Instant::now())),
            _ => None,
        })
    }
}

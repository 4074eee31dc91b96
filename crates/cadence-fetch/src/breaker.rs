//! Per-endpoint circuit breakers
//!
//! Each breaker is either closed or open. An open breaker refuses calls until
//! its cooldown has elapsed, then lets exactly one probe through. A successful
//! probe closes it; a failed probe re-arms the cooldown.

use crate::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker configuration shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long an open breaker refuses calls
    #[serde(with = "crate::config::duration_ms")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Snapshot of one endpoint's breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub failure_threshold: u32,
    /// A probe was let through and has not reported back yet
    pub probe_in_flight: bool,
}

impl CircuitBreakerState {
    fn closed(failure_threshold: u32) -> Self {
        Self {
            is_open: false,
            consecutive_failures: 0,
            last_failure_at: None,
            cooldown_until: None,
            failure_threshold,
            probe_in_flight: false,
        }
    }
}

/// Registry holding one breaker per endpoint name
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, CircuitBreakerState>,
}

impl CircuitBreakerRegistry {
    /// Create a registry; breakers are created closed on first use
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Whether a call to `endpoint` may be made now
    ///
    /// Once the cooldown of an open breaker has elapsed this answers `true`
    /// to a single caller and `false` to everyone else until that probe
    /// reports back through `record_success` or `record_failure`.
    pub fn may_attempt(&self, endpoint: &str) -> bool {
        let Some(mut state) = self.breakers.get_mut(endpoint) else {
            return true;
        };

        if !state.is_open {
            return true;
        }
        if state.probe_in_flight {
            return false;
        }

        let now = self.clock.now();
        match state.cooldown_until {
            Some(until) if now < until => false,
            _ => {
                state.probe_in_flight = true;
                info!("Circuit for {} cooled down, allowing probe", endpoint);
                true
            }
        }
    }

    /// Record a successful call; always resets the failure streak
    ///
    /// An open breaker is closed only by the success of its probe. A call
    /// admitted before the breaker opened leaves the cooldown in place.
    pub fn record_success(&self, endpoint: &str) {
        if let Some(mut state) = self.breakers.get_mut(endpoint) {
            state.consecutive_failures = 0;

            if state.is_open && state.probe_in_flight {
                info!("Circuit for {} closed after successful probe", endpoint);
                state.is_open = false;
                state.cooldown_until = None;
                state.probe_in_flight = false;
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, endpoint: &str) {
        let now = self.clock.now();
        let threshold = self.config.failure_threshold;
        let mut state = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| CircuitBreakerState::closed(threshold));

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);

        let failed_probe = state.is_open;
        if failed_probe || state.consecutive_failures >= state.failure_threshold {
            state.is_open = true;
            state.probe_in_flight = false;
            state.cooldown_until = Some(now + self.config.cooldown);
            warn!(
                "Circuit for {} open for {:?} after {} consecutive failures",
                endpoint, self.config.cooldown, state.consecutive_failures
            );
        }
    }

    /// Snapshot of an endpoint's breaker, if it has recorded anything
    pub fn state(&self, endpoint: &str) -> Option<CircuitBreakerState> {
        self.breakers.get(endpoint).map(|s| s.value().clone())
    }

    /// Whether the endpoint's breaker is currently open
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.breakers.get(endpoint).map_or(false, |s| s.is_open)
    }

    /// Close one breaker
    pub fn reset(&self, endpoint: &str) {
        self.breakers.remove(endpoint);
    }

    /// Close every breaker
    pub fn reset_all(&self) {
        self.breakers.clear();
    }
}

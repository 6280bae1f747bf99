//! Circuit breaker for instance protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within window >= failure_threshold
//! Open → Half-Open: after cool_down
//! Half-Open → Closed: success_threshold consecutive trial successes
//! Half-Open → Open: any trial failure (cool_down restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per target (service/instance), created lazily and kept
//!   for the process lifetime, across deregistration and eviction
//! - Fail fast in Open state (no I/O attempted)
//! - Every transition happens under the target's own mutex

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cool_down: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            window: config.window(),
            cool_down: config.cool_down(),
            half_open_max_calls: config.half_open_max_calls.max(1),
            success_threshold: config.success_threshold.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    /// Bumped on every transition; permits from an older generation are stale.
    generation: u64,
    /// Failure timestamps inside the rolling window (Closed only).
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
        }
    }
}

/// Serializable view of a breaker for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub recent_failures: usize,
    pub half_open_in_flight: u32,
}

/// Admission to call a target, settled with the call's outcome.
///
/// A permit dropped without being settled (the caller's future was
/// cancelled) releases its slot; an unsettled Half-Open trial counts as a
/// failed trial.
#[derive(Debug)]
#[must_use = "settle the permit with the call outcome"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit holds a Half-Open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, false);
    }

    pub fn settle(self, success: bool) {
        if success {
            self.success();
        } else {
            self.failure();
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        tracing::debug!(target_id = %self.breaker.target, "Trial call abandoned");
        self.breaker.settle(self.generation, true, false);
    }
}

/// Three-state breaker guarding one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    settings: BreakerSettings,
    record: Mutex<BreakerRecord>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            target: target.into(),
            settings,
            record: Mutex::new(BreakerRecord::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Admit a call, or `None` when the circuit rejects it.
    ///
    /// In Half-Open the permit reserves one of `half_open_max_calls` trial
    /// slots until it is settled or dropped.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut record = self.record.lock();
        let now = Instant::now();

        if record.state == CircuitState::Open {
            let cooled = record
                .opened_at
                .map_or(true, |at| now.duration_since(at) >= self.settings.cool_down);
            if !cooled {
                return None;
            }
            self.transition(&mut record, CircuitState::HalfOpen);
        }

        let trial = match record.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if record.half_open_in_flight < self.settings.half_open_max_calls => {
                record.half_open_in_flight += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => return None,
        };

        Some(BreakerPermit {
            breaker: self.clone(),
            generation: record.generation,
            trial,
            settled: false,
        })
    }

    /// Success of a call made without a permit.
    pub fn record_success(&self) {
        let mut record = self.record.lock();
        if record.state == CircuitState::Closed {
            record.failures.clear();
        }
    }

    /// Failure of a call made without a permit.
    pub fn record_failure(&self) {
        let mut record = self.record.lock();
        match record.state {
            CircuitState::Closed => self.closed_failure(&mut record),
            CircuitState::HalfOpen => self.transition(&mut record, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn settle(&self, generation: u64, trial: bool, success: bool) {
        let mut record = self.record.lock();
        // The state this permit was issued under has already ended.
        if record.generation != generation {
            return;
        }
        match (record.state, trial) {
            (CircuitState::Closed, false) => {
                if success {
                    record.failures.clear();
                } else {
                    self.closed_failure(&mut record);
                }
            }
            (CircuitState::HalfOpen, true) => {
                record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
                if !success {
                    self.transition(&mut record, CircuitState::Open);
                    return;
                }
                record.half_open_successes += 1;
                if record.half_open_successes >= self.settings.success_threshold {
                    self.transition(&mut record, CircuitState::Closed);
                }
            }
            _ => {}
        }
    }

    fn closed_failure(&self, record: &mut BreakerRecord) {
        let now = Instant::now();
        record.failures.push_back(now);
        while let Some(&oldest) = record.failures.front() {
            if now.duration_since(oldest) > self.settings.window {
                record.failures.pop_front();
            } else {
                break;
            }
        }
        if record.failures.len() >= self.settings.failure_threshold as usize {
            self.transition(record, CircuitState::Open);
        }
    }

    /// Current state. An expired cool-down is reported as Half-Open.
    pub fn state(&self) -> CircuitState {
        let record = self.record.lock();
        match (record.state, record.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() >= self.settings.cool_down => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let record = self.record.lock();
        BreakerSnapshot {
            target: self.target.clone(),
            state,
            recent_failures: record.failures.len(),
            half_open_in_flight: record.half_open_in_flight,
        }
    }

    fn transition(&self, record: &mut BreakerRecord, to: CircuitState) {
        let from = record.state;
        record.state = to;
        record.generation += 1;
        match to {
            CircuitState::Open => {
                record.opened_at = Some(Instant::now());
                record.half_open_in_flight = 0;
                record.half_open_successes = 0;
                tracing::warn!(target_id = %self.target, from = %from, "Circuit opened");
            }
            CircuitState::HalfOpen => {
                record.half_open_in_flight = 0;
                record.half_open_successes = 0;
                tracing::info!(target_id = %self.target, "Circuit half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                record.failures.clear();
                record.opened_at = None;
                record.half_open_in_flight = 0;
                record.half_open_successes = 0;
                tracing::info!(target_id = %self.target, "Circuit closed");
            }
        }
        metrics::record_circuit_state(&self.target, to.as_gauge());
    }
}

/// Lazily created breakers keyed by target.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    /// Target key for an instance of a service.
    pub fn key(service: &str, instance_id: &str) -> String {
        format!("{service}/{instance_id}")
    }

    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(target) {
            return existing.clone();
        }
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.settings.clone())))
            .clone()
    }

    pub fn for_instance(&self, service: &str, instance_id: &str) -> Arc<CircuitBreaker> {
        self.get(&Self::key(service, instance_id))
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.target.cmp(&b.target));
        all
    }
}

//! Breaker counters and recent transitions.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::state::State;

const TRANSITION_HISTORY: usize = 32;

/// One state change, stamped with the breaker's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: State,
    pub to_state: State,
    pub timestamp_ms: u64,
}

impl StateTransition {
    pub fn new(from_state: State, to_state: State, timestamp_ms: u64) -> Self {
        Self {
            from_state,
            to_state,
            timestamp_ms,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    successes: u64,
    failures: u64,
    rejected: u64,
    transitions: u64,
    last_opened_ms: Option<u64>,
    last_closed_ms: Option<u64>,
    history: VecDeque<StateTransition>,
}

/// Outcome counters for one breaker.
///
/// Rejections are counted apart from requests: a rejected call never
/// reached the backend.
#[derive(Debug, Default)]
pub struct CircuitBreakerMetrics {
    tally: Mutex<Tally>,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.tally.lock().successes += 1;
    }

    pub fn record_failure(&self) {
        self.tally.lock().failures += 1;
    }

    pub fn record_rejected(&self) {
        self.tally.lock().rejected += 1;
    }

    pub fn record_transition(&self, transition: StateTransition) {
        let mut tally = self.tally.lock();
        tally.transitions += 1;
        match transition.to_state {
            State::Open => tally.last_opened_ms = Some(transition.timestamp_ms),
            State::Closed => tally.last_closed_ms = Some(transition.timestamp_ms),
            State::HalfOpen => {}
        }
        if tally.history.len() == TRANSITION_HISTORY {
            tally.history.pop_front();
        }
        tally.history.push_back(transition);
    }

    pub fn total_successes(&self) -> u64 {
        self.tally.lock().successes
    }

    pub fn total_failures(&self) -> u64 {
        self.tally.lock().failures
    }

    pub fn total_rejected(&self) -> u64 {
        self.tally.lock().rejected
    }

    pub fn total_transitions(&self) -> u64 {
        self.tally.lock().transitions
    }

    pub fn total_requests(&self) -> u64 {
        let tally = self.tally.lock();
        tally.successes + tally.failures
    }

    /// Percentage of backend calls that failed.
    pub fn failure_rate(&self) -> f64 {
        let tally = self.tally.lock();
        percent(tally.failures, tally.successes + tally.failures)
    }

    /// Up to `n` most recent transitions, oldest first.
    pub fn recent_transitions(&self, n: usize) -> Vec<StateTransition> {
        let tally = self.tally.lock();
        let skip = tally.history.len().saturating_sub(n);
        tally.history.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&self) {
        *self.tally.lock() = Tally::default();
    }

    pub fn snapshot(&self) -> CircuitBreakerMetricsSnapshot {
        let tally = self.tally.lock();
        let total_requests = tally.successes + tally.failures;
        let skip = tally.history.len().saturating_sub(5);
        CircuitBreakerMetricsSnapshot {
            total_successes: tally.successes,
            total_failures: tally.failures,
            total_rejected: tally.rejected,
            total_requests,
            failure_rate: percent(tally.failures, total_requests),
            total_transitions: tally.transitions,
            last_opened_ms: tally.last_opened_ms,
            last_closed_ms: tally.last_closed_ms,
            recent_transitions: tally.history.iter().skip(skip).cloned().collect(),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Point-in-time copy of [`CircuitBreakerMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetricsSnapshot {
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
    pub total_requests: u64,
    pub failure_rate: f64,
    pub total_transitions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_closed_ms: Option<u64>,
    pub recent_transitions: Vec<StateTransition>,
}

impl std::fmt::Display for CircuitBreakerMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "backend calls: {} ({} ok, {} failed, {:.1}% failure rate)",
            self.total_requests, self.total_successes, self.total_failures, self.failure_rate
        )?;
        writeln!(f, "rejected: {}", self.total_rejected)?;
        write!(f, "transitions: {}", self.total_transitions)?;
        for t in &self.recent_transitions {
            write!(f, "\n  {} -> {} @ {}ms", t.from_state, t.to_state, t.timestamp_ms)?;
        }
        Ok(())
    }
}

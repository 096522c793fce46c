//! Circuit Breaker State Machine
//!
//! Implements the core circuit breaker state machine with three states:
//! - Closed: Normal operation, requests are allowed
//! - Open: Circuit is open, requests are rejected without touching the backend
//! - Half-Open: A single probe decides whether to close or re-open

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use safari_kernel::{Clock, DetectResult, DetectionError, SystemClock};

use super::config::CircuitBreakerConfig;
use super::metrics::{CircuitBreakerMetrics, StateTransition};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Normal operation - requests are allowed
    Closed,
    /// Circuit is open - requests are blocked
    Open,
    /// Testing recovery - one probe allowed
    HalfOpen,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Closed => write!(f, "closed"),
            State::Open => write!(f, "open"),
            State::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// The half-open probe currently holding the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeSlot {
    id: u64,
    started_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    last_failure_ms: u64,
    probe: Option<ProbeSlot>,
    next_probe_id: u64,
}

/// Who is reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reporter {
    /// Direct `record_*` call on the breaker.
    Manual,
    /// A permit granted while closed.
    Call,
    /// A half-open probe permit.
    Probe(u64),
}

/// Circuit Breaker implementation
///
/// Counters and the state enum are updated under a single lock so concurrent
/// callers always observe a consistent transition.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    metrics: CircuitBreakerMetrics,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                last_failure_ms: 0,
                probe: None,
                next_probe_id: 0,
            }),
            metrics: CircuitBreakerMetrics::new(),
            clock,
        })
    }

    /// Get the current state, moving OPEN to HALF_OPEN once the recovery
    /// timeout has elapsed since the last failure.
    pub fn state(&self) -> State {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);
        inner.state
    }

    /// Ask to run one call against the protected backend.
    ///
    /// Fails fast with [`DetectionError::ServiceUnavailable`] while open, or
    /// while half-open with a probe already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> DetectResult<BreakerPermit> {
        if !self.config.enabled {
            return Ok(BreakerPermit::new(Arc::clone(self), Reporter::Call));
        }

        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);

        match inner.state {
            State::Closed => Ok(BreakerPermit::new(Arc::clone(self), Reporter::Call)),
            State::HalfOpen => {
                let timeout = self.config.half_open_timeout.as_millis() as u64;
                let slot_free = inner
                    .probe
                    .is_none_or(|probe| now.saturating_sub(probe.started_ms) >= timeout);
                if slot_free {
                    let id = inner.next_probe_id;
                    inner.next_probe_id += 1;
                    if let Some(stale) = inner.probe.replace(ProbeSlot { id, started_ms: now }) {
                        debug!(breaker = %self.config.name, stale = stale.id, probe = id, "superseding stale probe");
                    }
                    Ok(BreakerPermit::new(Arc::clone(self), Reporter::Probe(id)))
                } else {
                    self.reject(inner.state)
                }
            }
            State::Open => self.reject(inner.state),
        }
    }

    /// Record a successful backend call.
    pub fn record_success(&self) {
        self.settle(Reporter::Manual, true);
    }

    /// Record a failed backend call.
    pub fn record_failure(&self) {
        self.settle(Reporter::Manual, false);
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        self.transition(&mut inner, State::Closed, now);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn metrics(&self) -> &CircuitBreakerMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    // =========================================================================
    // Private methods
    // =========================================================================

    fn reject<T>(&self, state: State) -> DetectResult<T> {
        self.metrics.record_rejected();
        Err(DetectionError::ServiceUnavailable {
            breaker: self.config.name.clone(),
            state: state.to_string(),
        })
    }

    /// Apply one verdict. In HALF_OPEN only the probe holding the slot (or
    /// a manual report) decides the next state; a superseded probe's
    /// verdict is dropped.
    fn settle(&self, reporter: Reporter, success: bool) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let superseded = match reporter {
            Reporter::Probe(id) => inner.probe.is_none_or(|probe| probe.id != id),
            _ => false,
        };
        if superseded {
            debug!(breaker = %self.config.name, ?reporter, success, "ignoring verdict of superseded probe");
            return;
        }
        let decides = inner.state != State::HalfOpen || reporter != Reporter::Call;

        if success {
            inner.consecutive_failures = 0;
            self.metrics.record_success();
            if inner.state == State::HalfOpen && decides {
                self.transition(&mut inner, State::Closed, now);
            }
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.last_failure_ms = now;
            self.metrics.record_failure();
            match inner.state {
                State::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                    self.transition(&mut inner, State::Open, now);
                }
                State::HalfOpen if decides => self.transition(&mut inner, State::Open, now),
                _ => {}
            }
        }
    }

    /// Free the probe slot, but only if `id` still holds it.
    fn release_probe(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.probe.is_some_and(|probe| probe.id == id) {
            inner.probe = None;
        }
    }

    fn maybe_half_open(&self, inner: &mut Inner, now: u64) {
        if inner.state == State::Open {
            let recovery = self.config.recovery_timeout.as_millis() as u64;
            if now.saturating_sub(inner.last_failure_ms) >= recovery {
                self.transition(inner, State::HalfOpen, now);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: State, now: u64) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.probe = None;
        if to == State::Closed {
            inner.consecutive_failures = 0;
        }

        match to {
            State::Open => warn!(
                breaker = %self.config.name,
                from = %from,
                consecutive_failures = inner.consecutive_failures,
                "circuit opened"
            ),
            _ => info!(breaker = %self.config.name, from = %from, to = %to, "circuit state changed"),
        }
        self.metrics
            .record_transition(StateTransition::new(from, to, now));
    }
}

/// Admission to run one call through a [`CircuitBreaker`].
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). A permit that is dropped or
/// [`release`](Self::release)d without a verdict frees its probe slot and
/// leaves the counters untouched.
#[derive(Debug)]
#[must_use = "a permit must report its outcome or be released"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    reporter: Reporter,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, reporter: Reporter) -> Self {
        Self {
            breaker,
            reporter,
            settled: false,
        }
    }

    /// Whether this permit is a half-open probe.
    pub fn is_probe(&self) -> bool {
        matches!(self.reporter, Reporter::Probe(_))
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(self.reporter, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.reporter, false);
    }

    /// Give the permit back without a verdict.
    pub fn release(self) {}
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let (false, Reporter::Probe(id)) = (self.settled, self.reporter) {
            self.breaker.release_probe(id);
        }
    }
}

//! Circuit Breaker
//!
//! Gates calls into the compute backend (state engine + classification
//! head) and fails fast while the backend is degraded.
//!
//! # Architecture
//!
//! ```text
//! +---------+  consecutive failures >= threshold   +--------+
//! | CLOSED  | -----------------------------------> |  OPEN  |
//! +---------+                                      +--------+
//!      ^                                               |
//!      | probe succeeds          recovery_timeout since |
//!      |                               last failure     v
//!      |                                         +-----------+
//!      +---------------------------------------- | HALF-OPEN |
//!                 probe fails: back to OPEN      +-----------+
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use safari_foundation::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("compute"));
//!
//! let permit = breaker.try_acquire()?; // ServiceUnavailable while open
//! match run_backend().await {
//!     Ok(out) => { permit.record_success(); Ok(out) }
//!     Err(e) => { permit.record_failure(); Err(e) }
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod state;

pub use config::CircuitBreakerConfig;
pub use metrics::{CircuitBreakerMetrics, CircuitBreakerMetricsSnapshot, StateTransition};
pub use state::{BreakerPermit, CircuitBreaker, State};

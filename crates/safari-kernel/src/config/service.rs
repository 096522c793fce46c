//! Typed detection service configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use super::{ConfigError, ConfigResult};

/// Root configuration of the detection service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionServiceConfig {
    pub model: ModelSettings,
    pub species: HeadSettings,
    pub fossil: FossilSettings,
    pub cache: CacheSettings,
    pub rate_limits: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub sessions: SessionSettings,
}

/// Liquid network and pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Minimum top-1 probability for a label to be reported.
    pub confidence_threshold: f32,
    /// Neurons per liquid layer.
    pub layer_size: usize,
    /// `(tau_min, tau_max)` in milliseconds.
    pub time_constants_range: (f32, f32),
    pub num_layers: usize,
    /// Items processed concurrently inside one batch chunk.
    pub batch_size: usize,
    /// Hard cap on the number of items in a batch request.
    pub max_batch_size: usize,
    /// Latency above which a request is logged as slow.
    pub processing_timeout_ms: u64,
    /// Largest input (scalar count) accepted by the compute core.
    pub max_input_elements: usize,
    /// Seed for reference weight initialisation.
    pub seed: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.90,
            layer_size: 1024,
            time_constants_range: (10.0, 100.0),
            num_layers: 3,
            batch_size: 32,
            max_batch_size: 32,
            processing_timeout_ms: 100,
            max_input_elements: 16 * 1024 * 1024,
            seed: 42,
        }
    }
}

/// Classification head vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadSettings {
    pub labels: Vec<String>,
}

impl Default for HeadSettings {
    fn default() -> Self {
        Self {
            labels: [
                "african_elephant",
                "lion",
                "giraffe",
                "plains_zebra",
                "cheetah",
                "black_rhinoceros",
                "hippopotamus",
                "spotted_hyena",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Reference age of a fossil class, in millions of years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeRange {
    pub estimate_ma: f64,
    pub lower_ma: f64,
    pub upper_ma: f64,
}

impl AgeRange {
    pub const fn new(estimate_ma: f64, lower_ma: f64, upper_ma: f64) -> Self {
        Self {
            estimate_ma,
            lower_ma,
            upper_ma,
        }
    }
}

/// Fossil head vocabulary and dating table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FossilSettings {
    pub labels: Vec<String>,
    pub age_table: BTreeMap<String, AgeRange>,
}

impl Default for FossilSettings {
    fn default() -> Self {
        let table = [
            ("theropod", AgeRange::new(150.0, 66.0, 231.0)),
            ("sauropod", AgeRange::new(150.0, 66.0, 201.0)),
            ("ornithopod", AgeRange::new(110.0, 66.0, 170.0)),
            ("ceratopsian", AgeRange::new(80.0, 66.0, 161.0)),
            ("ankylosaur", AgeRange::new(100.0, 66.0, 168.0)),
            ("pterosaur", AgeRange::new(150.0, 66.0, 228.0)),
        ];
        Self {
            labels: table.iter().map(|(l, _)| l.to_string()).collect(),
            age_table: table.into_iter().map(|(l, r)| (l.to_string(), r)).collect(),
        }
    }
}

/// Result cache parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600,
            max_entries: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// `requests` per `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub requests: u32,
    pub period: u64,
}

impl RateLimitRule {
    pub const fn new(requests: u32, period: u64) -> Self {
        Self { requests, period }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.period)
    }
}

/// Per-operation fixed-window limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Applies to operations without an explicit rule.
    pub default: RateLimitRule,
    /// Keyed by operation name (`detect_species`, `detect_fossil`, `batch_detect`).
    pub operations: BTreeMap<String, RateLimitRule>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut operations = BTreeMap::new();
        operations.insert("detect_species".to_string(), RateLimitRule::new(30, 60));
        Self {
            default: RateLimitRule::new(60, 60),
            operations,
        }
    }
}

impl RateLimitSettings {
    /// The rule governing `operation`.
    pub fn rule_for(&self, operation: &str) -> RateLimitRule {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Circuit breaker thresholds; timeouts are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: u64,
    pub half_open_timeout: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: 30,
            half_open_timeout: 5,
        }
    }
}

/// Recurrent-state session arena limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_timeout_secs: 600,
        }
    }
}

impl DetectionServiceConfig {
    /// Check every section; the first violation is returned.
    pub fn validate(&self) -> ConfigResult<()> {
        let m = &self.model;
        if !(0.0..=1.0).contains(&m.confidence_threshold) {
            return Err(ConfigError::invalid(
                "model.confidence_threshold",
                format!("{} is outside [0, 1]", m.confidence_threshold),
            ));
        }
        if !(256..=2048).contains(&m.layer_size) || m.layer_size % 128 != 0 {
            return Err(ConfigError::invalid(
                "model.layer_size",
                format!("{} must be a multiple of 128 within [256, 2048]", m.layer_size),
            ));
        }
        let (tau_min, tau_max) = m.time_constants_range;
        if !(tau_min >= 1.0 && tau_min < tau_max && tau_max <= 1000.0) {
            return Err(ConfigError::invalid(
                "model.time_constants_range",
                format!("({tau_min}, {tau_max}) must satisfy 1 <= min < max <= 1000"),
            ));
        }
        if !(1..=8).contains(&m.num_layers) {
            return Err(ConfigError::invalid(
                "model.num_layers",
                format!("{} is outside [1, 8]", m.num_layers),
            ));
        }
        if m.batch_size == 0 {
            return Err(ConfigError::invalid("model.batch_size", "must be positive"));
        }
        if m.max_batch_size == 0 {
            return Err(ConfigError::invalid("model.max_batch_size", "must be positive"));
        }
        if m.max_input_elements == 0 {
            return Err(ConfigError::invalid("model.max_input_elements", "must be positive"));
        }

        validate_labels("species.labels", &self.species.labels)?;
        validate_labels("fossil.labels", &self.fossil.labels)?;
        for (label, range) in &self.fossil.age_table {
            if !(range.lower_ma <= range.estimate_ma && range.estimate_ma <= range.upper_ma) {
                return Err(ConfigError::invalid(
                    "fossil.age_table",
                    format!("range for '{label}' must satisfy lower <= estimate <= upper"),
                ));
            }
        }

        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::invalid("cache.ttl_seconds", "must be positive"));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", "must be positive"));
        }

        let rules = std::iter::once(("default", &self.rate_limits.default)).chain(
            self.rate_limits
                .operations
                .iter()
                .map(|(op, rule)| (op.as_str(), rule)),
        );
        for (name, rule) in rules {
            if rule.requests == 0 || rule.period == 0 {
                return Err(ConfigError::invalid(
                    "rate_limits",
                    format!("rule '{name}' needs positive requests and period"),
                ));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be positive",
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::invalid("sessions.max_sessions", "must be positive"));
        }
        Ok(())
    }
}

fn validate_labels(field: &str, labels: &[String]) -> ConfigResult<()> {
    if labels.is_empty() {
        return Err(ConfigError::invalid(field, "at least one label is required"));
    }
    let mut seen = HashSet::new();
    for label in labels {
        if label.trim().is_empty() || label == crate::types::UNKNOWN_LABEL {
            return Err(ConfigError::invalid(field, format!("'{label}' is not a usable label")));
        }
        if !seen.insert(label.as_str()) {
            return Err(ConfigError::invalid(field, format!("duplicate label '{label}'")));
        }
    }
    Ok(())
}

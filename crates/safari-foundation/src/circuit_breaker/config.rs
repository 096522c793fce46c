//! Circuit Breaker Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use safari_kernel::config::CircuitBreakerSettings;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and rejections
    pub name: String,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is admitted
    pub recovery_timeout: Duration,
    /// How long a half-open probe may stay unreported before another is admitted
    pub half_open_timeout: Duration,
    /// Whether the circuit breaker is enabled
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_timeout: Duration::from_secs(5),
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build from the service configuration section.
    pub fn from_settings(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout),
            half_open_timeout: Duration::from_secs(settings.half_open_timeout),
            enabled: true,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_timeout(mut self, timeout: Duration) -> Self {
        self.half_open_timeout = timeout;
        self
    }

    /// Enable or disable the circuit breaker
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_converts_seconds() {
        let settings = CircuitBreakerSettings {
            failure_threshold: 3,
            recovery_timeout: 10,
            half_open_timeout: 2,
        };
        let config = CircuitBreakerConfig::from_settings("compute", &settings);
        assert_eq!(config.name, "compute");
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.half_open_timeout, Duration::from_secs(2));
        assert!(config.enabled);
    }

    #[test]
    fn test_builder() {
        let config = CircuitBreakerConfig::new("x")
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_millis(50))
            .with_enabled(false);
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.recovery_timeout, Duration::from_millis(50));
        assert!(!config.enabled);
    }
}

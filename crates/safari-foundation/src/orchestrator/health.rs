//! Service health report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::State;
use crate::metrics::PerformanceSnapshot;

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, with reduced guarantees (no cache, or the breaker is probing).
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of probing one model pipeline with a synthetic input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub available: bool,
    pub labels: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsHealth {
    pub species: ModelHealth,
    pub fossil: ModelHealth,
}

impl ModelsHealth {
    pub fn all_available(&self) -> bool {
        self.species.available && self.fossil.available
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub models: ModelsHealth,
    /// Whether the result cache is enabled and reachable.
    pub cache: bool,
    pub circuit_breaker: State,
    pub checked_at: DateTime<Utc>,
    pub performance_metrics: PerformanceSnapshot,
}

/// Fold the probe outcomes into an overall status.
///
/// A failed model probe or an open breaker is unhealthy; an unreachable
/// cache or a probing breaker is degraded. A disabled cache is neither.
pub fn overall_status(models: &ModelsHealth, cache_enabled: bool, cache_ok: bool, breaker: State) -> HealthStatus {
    if !models.all_available() || breaker == State::Open {
        HealthStatus::Unhealthy
    } else if (cache_enabled && !cache_ok) || breaker == State::HalfOpen {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(species: bool, fossil: bool) -> ModelsHealth {
        let probe = |available| ModelHealth {
            available,
            labels: 2,
            error: None,
        };
        ModelsHealth {
            species: probe(species),
            fossil: probe(fossil),
        }
    }

    #[test]
    fn test_status_folding() {
        assert_eq!(overall_status(&models(true, true), true, true, State::Closed), HealthStatus::Healthy);
        assert_eq!(overall_status(&models(true, true), true, false, State::Closed), HealthStatus::Degraded);
        assert_eq!(overall_status(&models(true, true), false, false, State::Closed), HealthStatus::Healthy);
        assert_eq!(overall_status(&models(true, true), true, true, State::HalfOpen), HealthStatus::Degraded);
        assert_eq!(overall_status(&models(true, true), true, true, State::Open), HealthStatus::Unhealthy);
        assert_eq!(overall_status(&models(true, false), true, true, State::Closed), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    }
}

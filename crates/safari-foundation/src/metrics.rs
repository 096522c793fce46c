//! Performance metrics
//!
//! Rolling per-operation latency and confidence history, batch success
//! rates, cache hit/miss counters and error counts by kind.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use safari_kernel::ErrorKind;

/// Samples kept per operation.
pub const HISTORY_LIMIT: usize = 1000;

/// Latency percentiles (p50, p90, p95, p99)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyPercentiles {
    fn from_samples(samples: &VecDeque<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let pick = |q: f64| {
            let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        Self {
            p50_ms: pick(0.50),
            p90_ms: pick(0.90),
            p95_ms: pick(0.95),
            p99_ms: pick(0.99),
        }
    }
}

#[derive(Debug, Default)]
struct OperationHistory {
    total: u64,
    latencies_ms: VecDeque<f64>,
    confidences: VecDeque<f32>,
}

impl OperationHistory {
    fn push(&mut self, latency_ms: f64, confidence: f32) {
        self.total += 1;
        self.latencies_ms.push_back(latency_ms);
        self.confidences.push_back(confidence);
        if self.latencies_ms.len() > HISTORY_LIMIT {
            self.latencies_ms.pop_front();
            self.confidences.pop_front();
        }
    }
}

/// Per-operation summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub total_detections: u64,
    pub average_latency_ms: f64,
    pub latency_percentiles: LatencyPercentiles,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub total_batches: u64,
    pub total_items: u64,
    pub average_success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Serializable view of [`PerformanceMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub operations: BTreeMap<String, OperationMetrics>,
    pub batches: BatchMetrics,
    pub cache: CacheMetrics,
    /// Keyed by error code
    pub errors: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    operations: HashMap<String, OperationHistory>,
    batch_success_rates: VecDeque<f64>,
    total_batches: u64,
    total_batch_items: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: HashMap<ErrorKind, u64>,
}

/// In-memory collector shared by the orchestrator and its interceptors
#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    inner: RwLock<Inner>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_detection(&self, operation: &str, latency_ms: f64, confidence: f32) {
        let mut inner = self.inner.write();
        inner
            .operations
            .entry(operation.to_string())
            .or_default()
            .push(latency_ms, confidence);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        *self.inner.write().errors.entry(kind).or_insert(0) += 1;
    }

    pub fn record_batch(&self, batch_size: usize, successful: usize) {
        let mut inner = self.inner.write();
        inner.total_batches += 1;
        inner.total_batch_items += batch_size as u64;
        let rate = if batch_size == 0 {
            0.0
        } else {
            successful as f64 / batch_size as f64
        };
        inner.batch_success_rates.push_back(rate);
        if inner.batch_success_rates.len() > HISTORY_LIMIT {
            inner.batch_success_rates.pop_front();
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.write().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.inner.write().cache_misses += 1;
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let inner = self.inner.read();

        let operations = inner
            .operations
            .iter()
            .map(|(name, history)| {
                let n = history.latencies_ms.len().max(1) as f64;
                let metrics = OperationMetrics {
                    total_detections: history.total,
                    average_latency_ms: history.latencies_ms.iter().sum::<f64>() / n,
                    latency_percentiles: LatencyPercentiles::from_samples(&history.latencies_ms),
                    average_confidence: history.confidences.iter().map(|c| *c as f64).sum::<f64>()
                        / n,
                };
                (name.clone(), metrics)
            })
            .collect();

        let batches = BatchMetrics {
            total_batches: inner.total_batches,
            total_items: inner.total_batch_items,
            average_success_rate: if inner.batch_success_rates.is_empty() {
                0.0
            } else {
                inner.batch_success_rates.iter().sum::<f64>()
                    / inner.batch_success_rates.len() as f64
            },
        };

        let lookups = inner.cache_hits + inner.cache_misses;
        let cache = CacheMetrics {
            hits: inner.cache_hits,
            misses: inner.cache_misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.cache_hits as f64 / lookups as f64
            },
        };

        let errors = inner
            .errors
            .iter()
            .map(|(kind, count)| (kind.code().to_string(), *count))
            .collect();

        PerformanceSnapshot {
            operations,
            batches,
            cache,
            errors,
        }
    }
}

//! Collaborator contracts.
//!
//! The orchestrator composes these traits; none of them assumes a specific
//! numeric framework, image codec or cache server.
//!
//! ```text
//!  DetectionInput ──► FeatureExtractor ──► [ComputeBackend per liquid layer]
//!                                              │  (state engine)
//!                                              ▼
//!                                   ClassificationHead ──► label distribution
//!                                              │
//!                        (fossil only) SpecimenAnalyzer ──► measurements, age, model
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::DetectResult;
use crate::types::{AgeEstimation, DetectionInput, DetectionOptions, Measurements, OperationKind, PointSet};

/// A fixed, inference-time-immutable map `forward(tensor) -> tensor`.
///
/// Implementations must be `Send + Sync` so one instance can serve every
/// concurrent request.
pub trait ComputeBackend: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Length of the vectors accepted by [`forward`](Self::forward).
    fn input_dim(&self) -> usize;

    /// Length of the vectors produced by [`forward`](Self::forward).
    fn output_dim(&self) -> usize;

    /// Apply the map.
    fn forward(&self, input: &[f32]) -> DetectResult<Vec<f32>>;
}

/// Maps the aggregated liquid state to a probability distribution.
pub trait ClassificationHead: Send + Sync {
    /// Label vocabulary, index-aligned with [`classify`](Self::classify).
    fn labels(&self) -> &[String];

    /// Return one probability per label; the values must sum to 1.
    fn classify(&self, state: &[f32]) -> DetectResult<Vec<f32>>;
}

/// Turns raw inputs into feature vectors of the configured layer size.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(
        &self,
        kind: OperationKind,
        input: &DetectionInput,
        options: &DetectionOptions,
    ) -> DetectResult<Vec<f32>>;
}

/// Geometry and dating collaborator for fossil specimens.
#[async_trait]
pub trait SpecimenAnalyzer: Send + Sync {
    async fn measure(&self, points: &PointSet) -> DetectResult<Measurements>;

    async fn estimate_age(&self, label: &str, features: &[f32]) -> DetectResult<AgeEstimation>;

    async fn generate_model(&self, points: &PointSet) -> DetectResult<Vec<u8>>;
}

/// Key/value store with per-entry TTL holding serialized results.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries are never returned.
    async fn get(&self, key: &str) -> DetectResult<Option<String>>;

    /// Insert or overwrite an entry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> DetectResult<()>;

    /// Reachability probe used by health checks.
    async fn ping(&self) -> DetectResult<()>;
}

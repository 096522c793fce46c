//! Inference orchestrator
//!
//! Composes validation, the interceptor chain (latency, rate limit, circuit
//! breaker, cache) and the compute core into the `detect` and
//! `batch_detect` contracts.
//!
//! ```text
//! detect(request)
//!   │ validate (shape, options, input size, session)
//!   ▼
//! InterceptorChain ──► ComputeCore
//!                        ├─ FeatureExtractor::extract
//!                        ├─ LiquidStateEngine::propagate   (spawn_blocking)
//!                        ├─ ClassificationHead::classify
//!                        ├─ confidence threshold
//!                        └─ SpecimenAnalyzer               (fossil only)
//! ```

mod pipeline;
mod health;
mod service;

pub use pipeline::{DISTRIBUTION_TOLERANCE, Inference, ModelPipeline, Pipelines, apply_threshold, check_distribution};
pub use health::{HealthReport, HealthStatus, ModelHealth, ModelsHealth, overall_status};
pub use service::{BATCH_OPERATION, COMPUTE_BREAKER, DetectionService, DetectionServiceBuilder};

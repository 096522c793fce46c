//! The compute core wrapped by the interceptor chain.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use safari_kernel::{
    ClassificationHead, Clock, DetectResult, DetectionError, DetectionInput, DetectionMetrics,
    DetectionResult, FeatureExtractor, FossilReport, OperationKind, SpecimenAnalyzer, UNKNOWN_LABEL,
};

use crate::interceptor::{DetectContext, DetectCore};
use crate::session::SessionArena;
use crate::state_engine::{LiquidStateEngine, StateBuffer};

/// Tolerance on the sum of a classification distribution.
pub const DISTRIBUTION_TOLERANCE: f32 = 1e-4;

/// A liquid state engine and the head reading its aggregate.
pub struct ModelPipeline {
    engine: LiquidStateEngine,
    head: Arc<dyn ClassificationHead>,
}

impl std::fmt::Debug for ModelPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPipeline")
            .field("engine", &self.engine)
            .field("labels", &self.head.labels())
            .finish()
    }
}

/// Distribution produced for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub probabilities: Vec<f32>,
    pub layer_steps: u64,
    pub memory_bytes: u64,
    pub retried: bool,
}

impl ModelPipeline {
    pub fn new(engine: LiquidStateEngine, head: Arc<dyn ClassificationHead>) -> Self {
        Self { engine, head }
    }

    pub fn engine(&self) -> &LiquidStateEngine {
        &self.engine
    }

    pub fn labels(&self) -> &[String] {
        self.head.labels()
    }

    /// Propagate `features` through the engine and classify the aggregate.
    ///
    /// Numeric instability resets `buffer` and retries once; a second
    /// failure is reported as [`DetectionError::ModelInferenceError`].
    pub fn infer(&self, buffer: &mut StateBuffer, features: &[f32], now_ms: u64) -> DetectResult<Inference> {
        let (propagation, retried) = match self.engine.propagate(buffer, features, now_ms) {
            Ok(propagation) => (propagation, false),
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "resetting recurrent state and retrying once");
                buffer.reset();
                match self.engine.propagate(buffer, features, now_ms) {
                    Ok(propagation) => (propagation, true),
                    Err(retry_err) => {
                        buffer.reset();
                        return Err(DetectionError::ModelInferenceError(format!(
                            "retry after state reset failed: {retry_err}"
                        )));
                    }
                }
            }
            Err(err) => return Err(err),
        };

        let probabilities = self.head.classify(&propagation.state)?;
        check_distribution(&probabilities, self.head.labels().len())?;

        Ok(Inference {
            probabilities,
            layer_steps: propagation.layer_steps,
            memory_bytes: buffer.memory_bytes(),
            retried,
        })
    }
}

/// Reject distributions outside [0, 1] or not summing to 1.
pub fn check_distribution(probabilities: &[f32], labels: usize) -> DetectResult<()> {
    if probabilities.len() != labels {
        return Err(DetectionError::ModelInferenceError(format!(
            "head returned {} probabilities for {labels} labels",
            probabilities.len()
        )));
    }
    if probabilities
        .iter()
        .any(|p| !p.is_finite() || !(0.0..=1.0).contains(p))
    {
        return Err(DetectionError::ModelInferenceError(
            "probability outside [0, 1]".to_string(),
        ));
    }
    let sum: f32 = probabilities.iter().sum();
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(DetectionError::ModelInferenceError(format!(
            "probabilities sum to {sum}, expected 1"
        )));
    }
    Ok(())
}

/// Best label and its probability, or "Unknown" below `threshold`.
pub fn apply_threshold(labels: &[String], probabilities: &[f32], threshold: f32) -> (String, f32) {
    let best = probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1));
    match best {
        Some((index, confidence)) if confidence >= threshold => (labels[index].clone(), confidence),
        Some((_, confidence)) => (UNKNOWN_LABEL.to_string(), confidence),
        None => (UNKNOWN_LABEL.to_string(), 0.0),
    }
}

/// Both operation pipelines.
#[derive(Debug, Clone)]
pub struct Pipelines {
    pub species: Arc<ModelPipeline>,
    pub fossil: Arc<ModelPipeline>,
}

impl Pipelines {
    pub fn get(&self, kind: OperationKind) -> &Arc<ModelPipeline> {
        match kind {
            OperationKind::Species => &self.species,
            OperationKind::Fossil => &self.fossil,
        }
    }
}

pub(crate) struct ComputeCore {
    pub(crate) pipelines: Pipelines,
    pub(crate) extractor: Arc<dyn FeatureExtractor>,
    pub(crate) analyzer: Arc<dyn SpecimenAnalyzer>,
    pub(crate) sessions: Arc<SessionArena>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ComputeCore {
    async fn fossil_report(
        &self,
        ctx: &DetectContext,
        label: &str,
        features: &[f32],
    ) -> DetectResult<FossilReport> {
        let DetectionInput::Points(points) = &ctx.request.input else {
            return Err(DetectionError::InvalidInput(
                "fossil detection requires a point set".to_string(),
            ));
        };
        let measurements = self.analyzer.measure(points).await?;
        let age_estimation = self.analyzer.estimate_age(label, features).await?;
        let model_3d = if ctx.request.options.generate_3d {
            Some(self.analyzer.generate_model(points).await?)
        } else {
            None
        };
        Ok(FossilReport {
            measurements,
            age_estimation,
            model_3d,
        })
    }
}

#[async_trait]
impl DetectCore for ComputeCore {
    async fn run(&self, ctx: &DetectContext) -> DetectResult<DetectionResult> {
        let request = &ctx.request;
        let kind = request.kind;

        let session_buffer = request
            .session
            .map(|id| self.sessions.checkout(id, kind))
            .transpose()?;

        let features = self
            .extractor
            .extract(kind, &request.input, &request.options)
            .await?;

        let pipeline = Arc::clone(self.pipelines.get(kind));
        let guard = match session_buffer {
            Some(buffer) => Some(buffer.lock_owned().await),
            None => None,
        };
        let now_ms = self.clock.now_millis();
        let task_features = features.clone();

        let inference = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let mut scratch = StateBuffer::new();
            let buffer = match guard.as_deref_mut() {
                Some(buffer) => buffer,
                None => &mut scratch,
            };
            pipeline.infer(buffer, &task_features, now_ms)
        })
        .await
        .map_err(|err| DetectionError::Internal(format!("inference task failed: {err}")))??;

        let pipeline = self.pipelines.get(kind);
        let (label, confidence) =
            apply_threshold(pipeline.labels(), &inference.probabilities, ctx.effective_threshold);

        let fossil = match kind {
            OperationKind::Fossil => Some(self.fossil_report(ctx, &label, &features).await?),
            OperationKind::Species => None,
        };

        debug!(
            operation = kind.operation_name(),
            correlation_id = %request.correlation_id,
            %label,
            confidence,
            retried = inference.retried,
            "inference finished"
        );

        Ok(DetectionResult {
            correlation_id: request.correlation_id.clone(),
            operation: kind,
            label,
            confidence,
            metrics: DetectionMetrics {
                latency_ms: ctx.elapsed_ms(),
                memory_bytes: inference.memory_bytes,
                layer_steps: inference.layer_steps,
                retried: inference.retried,
            },
            fossil,
            cached: false,
        })
    }
}

//! `DetectionService` and its builder.

use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use tracing::{debug, info, instrument, warn};

use safari_kernel::config::DetectionServiceConfig;
use safari_kernel::{
    BatchReport, CacheStore, ClassificationHead, Clock, DetectResult, DetectionError,
    DetectionOptions, DetectionRequest, DetectionResult, FeatureExtractor, FossilDetection,
    KernelError, KernelResult, OperationKind, PointSet, SessionId, SpeciesDetection,
    SpecimenAnalyzer, SystemClock, Tensor,
};

use super::pipeline::{ComputeCore, ModelPipeline, Pipelines};
use super::health::{HealthReport, ModelHealth, ModelsHealth, overall_status};
use crate::backend::SoftmaxHead;
use crate::batch::{BatchScheduler, summarize};
use crate::cache::MemoryCacheStore;
use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetricsSnapshot, State,
};
use crate::interceptor::{
    CacheInterceptor, CircuitBreakerInterceptor, DetectContext, DetectInterceptor,
    InterceptorChain, LatencyInterceptor, RateLimitInterceptor, RequestOrigin,
};
use crate::metrics::{PerformanceMetrics, PerformanceSnapshot};
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::reference::{BoundingBoxAnalyzer, PoolingExtractor};
use crate::session::SessionArena;
use crate::state_engine::{LiquidLayerConfig, LiquidStateEngine, StateBuffer};

/// Name of the breaker guarding both model pipelines.
pub const COMPUTE_BREAKER: &str = "compute";

/// Rate-limit key charged once per batch.
pub const BATCH_OPERATION: &str = "batch_detect";

/// Seed offset between the species and fossil weights.
const FOSSIL_SEED_OFFSET: u64 = 1_000;

struct Inner {
    config: DetectionServiceConfig,
    chain: InterceptorChain,
    core: ComputeCore,
    scheduler: BatchScheduler,
    rate_limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<dyn CacheStore>>,
    metrics: Arc<PerformanceMetrics>,
    sessions: Arc<SessionArena>,
}

/// The detection orchestrator.
///
/// Cloning is cheap; clones share breaker, limiter, cache, sessions and
/// metrics.
///
/// ```rust,ignore
/// let service = DetectionService::builder(config).build()?;
/// let species = service
///     .detect_species(Tensor::from_vec(pixels), DetectionOptions::default())
///     .await?;
/// println!("{} ({:.2})", species.species, species.confidence);
/// ```
#[derive(Clone)]
pub struct DetectionService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DetectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionService")
            .field("interceptors", &self.inner.chain.names())
            .field("breaker", &self.inner.breaker)
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

impl DetectionService {
    pub fn builder(config: DetectionServiceConfig) -> DetectionServiceBuilder {
        DetectionServiceBuilder::new(config)
    }

    pub fn config(&self) -> &DetectionServiceConfig {
        &self.inner.config
    }

    /// Run one request through validation, the interceptor chain and the
    /// compute core.
    #[instrument(skip_all, fields(operation = request.kind.operation_name(), correlation_id = %request.correlation_id))]
    pub async fn detect(&self, request: DetectionRequest) -> DetectResult<DetectionResult> {
        self.execute(request, RequestOrigin::Direct).await
    }

    pub async fn detect_species(
        &self,
        input: Tensor,
        options: DetectionOptions,
    ) -> DetectResult<SpeciesDetection> {
        let request = DetectionRequest::species(input).with_options(options);
        self.detect(request).await.map(SpeciesDetection::from)
    }

    pub async fn detect_fossil(
        &self,
        input: PointSet,
        options: DetectionOptions,
    ) -> DetectResult<FossilDetection> {
        let request = DetectionRequest::fossil(input).with_options(options);
        self.detect(request).await.and_then(FossilDetection::try_from)
    }

    /// Detect every item of a batch, preserving input order.
    ///
    /// `max_batch_size` may only lower the configured cap. The batch is
    /// charged once against the `batch_detect` limit; items then pass the
    /// same breaker and cache as single calls.
    #[instrument(skip_all, fields(kind = %kind, items = items.len()))]
    pub async fn batch_detect(
        &self,
        items: Vec<DetectionRequest>,
        kind: OperationKind,
        max_batch_size: usize,
    ) -> DetectResult<BatchReport> {
        let inner = &self.inner;
        inner.scheduler.admit(items.len(), max_batch_size)?;
        inner.rate_limiter.acquire(BATCH_OPERATION)?;

        let outcomes = inner
            .scheduler
            .run(items, max_batch_size, |_, request| async move {
                if request.kind != kind {
                    return Err(DetectionError::InvalidInput(format!(
                        "batch item is a {} request in a {kind} batch",
                        request.kind
                    )));
                }
                self.execute(request, RequestOrigin::Batch).await
            })
            .await?;

        let report = summarize(outcomes);
        inner
            .metrics
            .record_batch(report.batch_size, report.successful_detections);
        info!(
            batch_size = report.batch_size,
            successful = report.successful_detections,
            success_rate = report.success_rate,
            "batch finished"
        );
        Ok(report)
    }

    /// Probe models, cache and breaker. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let models = ModelsHealth {
            species: self.probe(OperationKind::Species).await,
            fossil: self.probe(OperationKind::Fossil).await,
        };

        let cache_enabled = inner.cache.is_some();
        let cache_ok = match &inner.cache {
            Some(store) => match store.ping().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "cache unreachable");
                    false
                }
            },
            None => false,
        };

        let breaker = inner.breaker.state();
        let status = overall_status(&models, cache_enabled, cache_ok, breaker);
        debug!(%status, "health check");

        HealthReport {
            status,
            models,
            cache: cache_ok,
            circuit_breaker: breaker,
            checked_at: chrono::Utc::now(),
            performance_metrics: inner.metrics.snapshot(),
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn open_session(&self, kind: OperationKind) -> DetectResult<SessionId> {
        self.inner.sessions.open(kind)
    }

    pub fn close_session(&self, id: SessionId) -> DetectResult<()> {
        self.inner.sessions.close(id)
    }

    pub async fn reset_session(&self, id: SessionId) -> DetectResult<()> {
        self.inner.sessions.reset(id).await
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    // ------------------------------------------------------------------
    // Resilience administration
    // ------------------------------------------------------------------

    pub fn circuit_state(&self) -> State {
        self.inner.breaker.state()
    }

    pub fn circuit_metrics(&self) -> CircuitBreakerMetricsSnapshot {
        self.inner.breaker.metrics().snapshot()
    }

    pub fn reset_circuit(&self) {
        self.inner.breaker.reset();
    }

    pub fn rate_limit_status(&self, operation: &str) -> RateLimitStatus {
        self.inner.rate_limiter.status(operation)
    }

    pub fn reset_rate_limit(&self, operation: &str) -> bool {
        self.inner.rate_limiter.reset(operation)
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        self.inner.metrics.snapshot()
    }

    // ------------------------------------------------------------------

    async fn execute(
        &self,
        request: DetectionRequest,
        origin: RequestOrigin,
    ) -> DetectResult<DetectionResult> {
        let inner = &self.inner;
        if let Err(err) = self.validate(&request) {
            inner.metrics.record_error(err.kind());
            debug!(error = %err, "request rejected by validation");
            return Err(err);
        }

        let mut ctx = DetectContext::new(request, origin, inner.config.model.confidence_threshold);
        inner.chain.execute(&mut ctx, &inner.core).await
    }

    /// Boundary checks; failures here never reach the breaker.
    fn validate(&self, request: &DetectionRequest) -> DetectResult<()> {
        request.validate()?;

        let max = self.inner.config.model.max_input_elements;
        let elements = request.input.element_count();
        if elements > max {
            return Err(DetectionError::ResourceExhausted(format!(
                "input carries {elements} values, limit is {max}"
            )));
        }

        if let Some(id) = request.session {
            self.inner.sessions.checkout(id, request.kind)?;
        }
        Ok(())
    }

    async fn probe(&self, kind: OperationKind) -> ModelHealth {
        let pipeline = Arc::clone(self.inner.core.pipelines.get(kind));
        let labels = pipeline.labels().len();
        let size = pipeline.engine().config().layer_size();
        let now_ms = self.inner.core.clock.now_millis();

        let outcome = tokio::task::spawn_blocking(move || {
            pipeline.infer(&mut StateBuffer::new(), &vec![0.5; size], now_ms)
        })
        .await
        .map_err(|err| DetectionError::Internal(err.to_string()))
        .and_then(|r| r);

        match outcome {
            Ok(_) => ModelHealth {
                available: true,
                labels,
                error: None,
            },
            Err(err) => {
                warn!(%kind, error = %err, "model probe failed");
                ModelHealth {
                    available: false,
                    labels,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`DetectionService`].
///
/// Every collaborator defaults to the in-crate reference implementation and
/// can be replaced.
pub struct DetectionServiceBuilder {
    config: DetectionServiceConfig,
    clock: Option<Arc<dyn Clock>>,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    analyzer: Option<Arc<dyn SpecimenAnalyzer>>,
    cache: Option<Arc<dyn CacheStore>>,
    species: Option<(LiquidStateEngine, Arc<dyn ClassificationHead>)>,
    fossil: Option<(LiquidStateEngine, Arc<dyn ClassificationHead>)>,
    interceptors: Vec<Arc<dyn DetectInterceptor>>,
}

impl DetectionServiceBuilder {
    pub fn new(config: DetectionServiceConfig) -> Self {
        Self {
            config,
            clock: None,
            extractor: None,
            analyzer: None,
            cache: None,
            species: None,
            fossil: None,
            interceptors: Vec::new(),
        }
    }

    /// Time source shared by breaker, limiter, cache, sessions and the engine.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn feature_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn specimen_analyzer(mut self, analyzer: Arc<dyn SpecimenAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Replace the in-memory LRU store. Ignored when caching is disabled.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn species_model(mut self, engine: LiquidStateEngine, head: Arc<dyn ClassificationHead>) -> Self {
        self.species = Some((engine, head));
        self
    }

    pub fn fossil_model(mut self, engine: LiquidStateEngine, head: Arc<dyn ClassificationHead>) -> Self {
        self.fossil = Some((engine, head));
        self
    }

    /// Add an interceptor alongside the built-in ones.
    pub fn interceptor(mut self, interceptor: Arc<dyn DetectInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> KernelResult<DetectionService> {
        let config = self.config;
        config
            .validate()
            .map_err(|err| Report::new(KernelError::from(err)))
            .attach("validating detection service configuration")?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let model = &config.model;

        let species = match self.species {
            Some(parts) => parts,
            None => default_model(&config, &config.species.labels, model.seed)?,
        };
        let fossil = match self.fossil {
            Some(parts) => parts,
            None => default_model(
                &config,
                &config.fossil.labels,
                model.seed.wrapping_add(FOSSIL_SEED_OFFSET),
            )?,
        };
        let pipelines = Pipelines {
            species: Arc::new(ModelPipeline::new(species.0, species.1)),
            fossil: Arc::new(ModelPipeline::new(fossil.0, fossil.1)),
        };

        let metrics = Arc::new(PerformanceMetrics::new());
        let rate_limiter = Arc::new(RateLimiter::with_clock(config.rate_limits.clone(), clock.clone()));
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig::from_settings(COMPUTE_BREAKER, &config.circuit_breaker),
            clock.clone(),
        );
        let sessions = Arc::new(SessionArena::new(config.sessions.clone(), clock.clone()));

        let cache: Option<Arc<dyn CacheStore>> = if config.cache.enabled {
            Some(self.cache.unwrap_or_else(|| {
                Arc::new(MemoryCacheStore::with_clock(config.cache.max_entries, clock.clone()))
            }))
        } else {
            None
        };

        let mut interceptors: Vec<Arc<dyn DetectInterceptor>> = vec![
            Arc::new(LatencyInterceptor::new(
                Duration::from_millis(model.processing_timeout_ms),
                metrics.clone(),
            )),
            Arc::new(RateLimitInterceptor::new(rate_limiter.clone())),
            Arc::new(CircuitBreakerInterceptor::new(breaker.clone())),
        ];
        if let Some(store) = &cache {
            interceptors.push(Arc::new(CacheInterceptor::new(
                store.clone(),
                config.cache.ttl(),
                metrics.clone(),
            )));
        }
        interceptors.extend(self.interceptors);
        let chain = InterceptorChain::new(interceptors);

        let core = ComputeCore {
            pipelines,
            extractor: self
                .extractor
                .unwrap_or_else(|| Arc::new(PoolingExtractor::new(model.layer_size))),
            analyzer: self
                .analyzer
                .unwrap_or_else(|| Arc::new(BoundingBoxAnalyzer::new(config.fossil.age_table.clone()))),
            sessions: sessions.clone(),
            clock,
        };

        info!(
            layer_size = model.layer_size,
            num_layers = model.num_layers,
            confidence_threshold = model.confidence_threshold,
            cache = config.cache.enabled,
            interceptors = ?chain.names(),
            "detection service ready"
        );

        Ok(DetectionService {
            inner: Arc::new(Inner {
                scheduler: BatchScheduler::from_settings(&config.model),
                config,
                chain,
                core,
                rate_limiter,
                breaker,
                cache,
                metrics,
                sessions,
            }),
        })
    }
}

/// Seeded dense engine plus softmax head for one label vocabulary.
fn default_model(
    config: &DetectionServiceConfig,
    labels: &[String],
    seed: u64,
) -> KernelResult<(LiquidStateEngine, Arc<dyn ClassificationHead>)> {
    let model = &config.model;
    let build = || -> DetectResult<(LiquidStateEngine, Arc<dyn ClassificationHead>)> {
        let layer = LiquidLayerConfig::from_settings(model)?;
        let engine = LiquidStateEngine::dense(layer, model.num_layers, seed)?;
        let head = SoftmaxHead::new(labels.to_vec(), engine.state_dim(), seed.wrapping_add(1))?;
        Ok((engine, Arc::new(head)))
    };
    build()
        .map_err(|err| Report::new(KernelError::from(err)))
        .attach("building default model pipeline")
}

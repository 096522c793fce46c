//! Interceptor chain around the detection core.
//!
//! Interceptors are sorted by their declared [`InterceptOrder`] and run in
//! ascending order before the core (lowest value first) and in descending
//! order after it. Only interceptors whose `before` hook ran see the
//! `after` hook.
//!
//! ```text
//! detect ──► Latency ──► RateLimit ──► CircuitBreaker ──► Cache ──► core
//!                                 (short-circuit: reject, or cache hit)
//! result ◄── Latency ◄── RateLimit ◄── CircuitBreaker ◄── Cache ◄──
//! ```

mod cache;
mod circuit_breaker;
mod latency;
mod rate_limit;

pub use cache::CacheInterceptor;
pub use circuit_breaker::CircuitBreakerInterceptor;
pub use latency::LatencyInterceptor;
pub use rate_limit::RateLimitInterceptor;

use std::sync::Arc;
use tokio::time::Instant;

use async_trait::async_trait;

use safari_kernel::{DetectResult, DetectionRequest, DetectionResult};

use crate::circuit_breaker::BreakerPermit;

/// Numeric ordering slot of an interceptor.
///
/// Interceptors with equal order values run in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InterceptOrder(pub u32);

impl InterceptOrder {
    /// Outermost slot: sees every call, including rejections.
    pub const MONITOR: InterceptOrder = InterceptOrder(0);
    pub const RATE_LIMIT: InterceptOrder = InterceptOrder(100);
    pub const CIRCUIT_BREAKER: InterceptOrder = InterceptOrder(200);
    /// Innermost slot: a hit skips only the compute core.
    pub const CACHE: InterceptOrder = InterceptOrder(300);
}

/// What the chain does after a `before` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptAction {
    /// Pass to the next interceptor or the core.
    Continue,
    /// Short-circuit with a ready result.
    Respond(DetectionResult),
}

/// Where a call entered the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Direct,
    /// An item of a batch; the batch was charged against rate limits as a whole.
    Batch,
}

/// Per-call state threaded through the chain.
#[derive(Debug)]
pub struct DetectContext {
    pub request: DetectionRequest,
    pub origin: RequestOrigin,
    /// Request override or configured default.
    pub effective_threshold: f32,
    pub started_at: Instant,
    pub cache_key: Option<String>,
    pub(crate) permit: Option<BreakerPermit>,
}

impl DetectContext {
    pub fn new(request: DetectionRequest, origin: RequestOrigin, default_threshold: f32) -> Self {
        let effective_threshold = request
            .options
            .confidence_threshold
            .unwrap_or(default_threshold);
        Self {
            request,
            origin,
            effective_threshold,
            started_at: Instant::now(),
            cache_key: None,
            permit: None,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }
}

/// One link of the chain.
#[async_trait]
pub trait DetectInterceptor: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    fn order(&self) -> InterceptOrder;

    /// Runs before the core. Returning an error short-circuits the chain
    /// with that error.
    async fn before(&self, ctx: &mut DetectContext) -> DetectResult<InterceptAction>;

    /// Runs after the core (or after a short-circuit) with the final outcome.
    async fn after(&self, _ctx: &mut DetectContext, _outcome: &DetectResult<DetectionResult>) {}
}

/// The computation wrapped by the chain.
#[async_trait]
pub trait DetectCore: Send + Sync {
    async fn run(&self, ctx: &DetectContext) -> DetectResult<DetectionResult>;
}

/// Ordered interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn DetectInterceptor>>,
}

impl InterceptorChain {
    pub fn new(mut interceptors: Vec<Arc<dyn DetectInterceptor>>) -> Self {
        interceptors.sort_by_key(|i| i.order());
        Self { interceptors }
    }

    /// Add an interceptor, keeping the chain sorted.
    pub fn with(mut self, interceptor: Arc<dyn DetectInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self.interceptors.sort_by_key(|i| i.order());
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.interceptors.iter().map(|i| i.name().to_string()).collect()
    }

    pub async fn execute(
        &self,
        ctx: &mut DetectContext,
        core: &dyn DetectCore,
    ) -> DetectResult<DetectionResult> {
        let mut entered = 0;
        let mut short_circuit = None;

        for interceptor in &self.interceptors {
            entered += 1;
            match interceptor.before(ctx).await {
                Ok(InterceptAction::Continue) => {}
                Ok(InterceptAction::Respond(result)) => {
                    short_circuit = Some(Ok(result));
                    break;
                }
                Err(err) => {
                    short_circuit = Some(Err(err));
                    break;
                }
            }
        }

        let outcome = match short_circuit {
            Some(outcome) => outcome,
            None => core.run(ctx).await,
        };

        for interceptor in self.interceptors[..entered].iter().rev() {
            interceptor.after(ctx, &outcome).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use safari_kernel::{
        DetectionError, DetectionMetrics, OperationKind, Tensor,
    };

    struct Recorder {
        name: &'static str,
        order: u32,
        log: Arc<Mutex<Vec<String>>>,
        action: Option<DetectResult<InterceptAction>>,
    }

    #[async_trait]
    impl DetectInterceptor for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn order(&self) -> InterceptOrder {
            InterceptOrder(self.order)
        }
        async fn before(&self, _ctx: &mut DetectContext) -> DetectResult<InterceptAction> {
            self.log.lock().push(format!("before:{}", self.name));
            self.action.clone().unwrap_or(Ok(InterceptAction::Continue))
        }
        async fn after(&self, _ctx: &mut DetectContext, outcome: &DetectResult<DetectionResult>) {
            self.log
                .lock()
                .push(format!("after:{}:{}", self.name, outcome.is_ok()));
        }
    }

    struct Core(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl DetectCore for Core {
        async fn run(&self, ctx: &DetectContext) -> DetectResult<DetectionResult> {
            self.0.lock().push("core".into());
            Ok(result(&ctx.request.correlation_id))
        }
    }

    fn result(id: &str) -> DetectionResult {
        DetectionResult {
            correlation_id: id.to_string(),
            operation: OperationKind::Species,
            label: "lion".into(),
            confidence: 0.95,
            metrics: DetectionMetrics::default(),
            fossil: None,
            cached: false,
        }
    }

    fn recorder(
        name: &'static str,
        order: u32,
        log: &Arc<Mutex<Vec<String>>>,
        action: Option<DetectResult<InterceptAction>>,
    ) -> Arc<dyn DetectInterceptor> {
        Arc::new(Recorder {
            name,
            order,
            log: log.clone(),
            action,
        })
    }

    fn ctx() -> DetectContext {
        let request = DetectionRequest::species(Tensor::from_vec(vec![1.0]));
        DetectContext::new(request, RequestOrigin::Direct, 0.9)
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recorder("inner", 300, &log, None),
            recorder("outer", 0, &log, None),
        ]);

        let out = chain.execute(&mut ctx(), &Core(log.clone())).await;
        assert!(out.is_ok());
        assert_eq!(
            *log.lock(),
            vec!["before:outer", "before:inner", "core", "after:inner:true", "after:outer:true"]
        );
    }

    #[tokio::test]
    async fn test_rejection_skips_core_and_later_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reject = Err(DetectionError::ServiceUnavailable {
            breaker: "compute".into(),
            state: "open".into(),
        });
        let chain = InterceptorChain::new(vec![
            recorder("outer", 0, &log, None),
            recorder("gate", 200, &log, Some(reject)),
            recorder("inner", 300, &log, None),
        ]);

        let out = chain.execute(&mut ctx(), &Core(log.clone())).await;
        assert!(matches!(out, Err(DetectionError::ServiceUnavailable { .. })));
        assert_eq!(
            *log.lock(),
            vec!["before:outer", "before:gate", "after:gate:false", "after:outer:false"]
        );
    }

    #[tokio::test]
    async fn test_respond_short_circuits_with_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hit = Ok(InterceptAction::Respond(result("from-cache")));
        let chain = InterceptorChain::new(vec![recorder("cache", 300, &log, Some(hit))]);

        let out = chain.execute(&mut ctx(), &Core(log.clone())).await.unwrap();
        assert_eq!(out.correlation_id, "from-cache");
        assert!(!log.lock().contains(&"core".to_string()));
    }

    #[test]
    fn test_effective_threshold_prefers_request_option() {
        let request = DetectionRequest::species(Tensor::from_vec(vec![1.0]))
            .with_options(safari_kernel::DetectionOptions::new().with_confidence_threshold(0.5));
        let ctx = DetectContext::new(request, RequestOrigin::Batch, 0.9);
        assert_eq!(ctx.effective_threshold, 0.5);
    }
}

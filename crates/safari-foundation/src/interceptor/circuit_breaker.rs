use std::sync::Arc;

use async_trait::async_trait;

use safari_kernel::{DetectResult, DetectionResult};

use super::{DetectContext, DetectInterceptor, InterceptAction, InterceptOrder};
use crate::circuit_breaker::CircuitBreaker;

/// Admits calls through the breaker and reports their verdict.
///
/// Cache hits and non-backend errors release the permit without a verdict;
/// below-threshold ("Unknown") results count as successes.
pub struct CircuitBreakerInterceptor {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerInterceptor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl DetectInterceptor for CircuitBreakerInterceptor {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn order(&self) -> InterceptOrder {
        InterceptOrder::CIRCUIT_BREAKER
    }

    async fn before(&self, ctx: &mut DetectContext) -> DetectResult<InterceptAction> {
        ctx.permit = Some(self.breaker.try_acquire()?);
        Ok(InterceptAction::Continue)
    }

    async fn after(&self, ctx: &mut DetectContext, outcome: &DetectResult<DetectionResult>) {
        let Some(permit) = ctx.permit.take() else {
            return;
        };
        match outcome {
            Ok(result) if result.cached => permit.release(),
            Ok(_) => permit.record_success(),
            Err(err) if err.counts_as_backend_failure() => permit.record_failure(),
            Err(_) => permit.release(),
        }
    }
}

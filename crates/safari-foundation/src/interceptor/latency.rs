use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use safari_kernel::{DetectResult, DetectionResult};

use super::{DetectContext, DetectInterceptor, InterceptAction, InterceptOrder};
use crate::metrics::PerformanceMetrics;

/// Records per-call latency and outcome; warns when a call exceeds the soft
/// budget. Never cancels anything.
pub struct LatencyInterceptor {
    budget: Duration,
    metrics: Arc<PerformanceMetrics>,
}

impl LatencyInterceptor {
    pub fn new(budget: Duration, metrics: Arc<PerformanceMetrics>) -> Self {
        Self { budget, metrics }
    }
}

#[async_trait]
impl DetectInterceptor for LatencyInterceptor {
    fn name(&self) -> &str {
        "latency"
    }

    fn order(&self) -> InterceptOrder {
        InterceptOrder::MONITOR
    }

    async fn before(&self, _ctx: &mut DetectContext) -> DetectResult<InterceptAction> {
        Ok(InterceptAction::Continue)
    }

    async fn after(&self, ctx: &mut DetectContext, outcome: &DetectResult<DetectionResult>) {
        let latency_ms = ctx.elapsed_ms();
        let operation = ctx.request.kind.operation_name();
        let correlation_id = ctx.request.correlation_id.as_str();

        if latency_ms > self.budget.as_secs_f64() * 1000.0 {
            warn!(
                operation,
                correlation_id,
                latency_ms,
                budget_ms = self.budget.as_millis() as u64,
                "detection exceeded latency budget"
            );
        }

        match outcome {
            Ok(result) => {
                self.metrics
                    .record_detection(operation, latency_ms, result.confidence);
                debug!(
                    operation,
                    correlation_id,
                    latency_ms,
                    label = %result.label,
                    confidence = result.confidence,
                    cached = result.cached,
                    "detection completed"
                );
            }
            Err(err) => {
                self.metrics.record_error(err.kind());
                debug!(operation, correlation_id, latency_ms, error = %err, "detection failed");
            }
        }
    }
}

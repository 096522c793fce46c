use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use safari_kernel::{CacheStore, DetectResult, DetectionResult};

use super::{DetectContext, DetectInterceptor, InterceptAction, InterceptOrder};
use crate::cache::fingerprint;
use crate::metrics::PerformanceMetrics;

/// Serves repeated inputs from a [`CacheStore`] and stores fresh results.
///
/// Session-bound calls bypass the cache: their output depends on recurrent
/// state the key does not capture. Store failures degrade to a miss.
pub struct CacheInterceptor {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    metrics: Arc<PerformanceMetrics>,
}

impl CacheInterceptor {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, metrics: Arc<PerformanceMetrics>) -> Self {
        Self { store, ttl, metrics }
    }

    async fn lookup(&self, key: &str) -> Option<DetectionResult> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable cache entry");
                None
            }
        }
    }
}

#[async_trait]
impl DetectInterceptor for CacheInterceptor {
    fn name(&self) -> &str {
        "cache"
    }

    fn order(&self) -> InterceptOrder {
        InterceptOrder::CACHE
    }

    async fn before(&self, ctx: &mut DetectContext) -> DetectResult<InterceptAction> {
        if ctx.request.session.is_some() {
            return Ok(InterceptAction::Continue);
        }

        let key = fingerprint(
            ctx.request.kind,
            &ctx.request.input,
            &ctx.request.options,
            ctx.effective_threshold,
        );
        let hit = self.lookup(&key).await;
        ctx.cache_key = Some(key);

        match hit {
            Some(mut result) => {
                self.metrics.record_cache_hit();
                result.cached = true;
                result.correlation_id = ctx.request.correlation_id.clone();
                result.metrics.latency_ms = ctx.elapsed_ms();
                debug!(correlation_id = %ctx.request.correlation_id, "cache hit");
                Ok(InterceptAction::Respond(result))
            }
            None => {
                self.metrics.record_cache_miss();
                Ok(InterceptAction::Continue)
            }
        }
    }

    async fn after(&self, ctx: &mut DetectContext, outcome: &DetectResult<DetectionResult>) {
        let Ok(result) = outcome else {
            return;
        };
        if result.cached || result.is_unknown() {
            return;
        }
        let Some(key) = ctx.cache_key.as_deref() else {
            return;
        };

        match serde_json::to_string(result) {
            Ok(encoded) => {
                if let Err(err) = self.store.set(key, encoded, self.ttl).await {
                    warn!(key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(key, error = %err, "failed to encode result for cache"),
        }
    }
}

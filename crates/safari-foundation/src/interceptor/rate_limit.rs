use std::sync::Arc;

use async_trait::async_trait;

use safari_kernel::DetectResult;

use super::{DetectContext, DetectInterceptor, InterceptAction, InterceptOrder, RequestOrigin};
use crate::rate_limiter::RateLimiter;

/// Charges each direct call against its operation's window.
///
/// Batch items pass through; their batch was charged once up front.
pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl DetectInterceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn order(&self) -> InterceptOrder {
        InterceptOrder::RATE_LIMIT
    }

    async fn before(&self, ctx: &mut DetectContext) -> DetectResult<InterceptAction> {
        if ctx.origin == RequestOrigin::Direct {
            self.limiter.acquire(ctx.request.kind.operation_name())?;
        }
        Ok(InterceptAction::Continue)
    }
}

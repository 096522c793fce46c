//! Wildlife Safari Foundation
//!
//! The liquid state engine, the resilience primitives around it and the
//! [`DetectionService`] orchestrator that composes them.

// state engine module - liquid layers and recurrent state buffers
pub mod state_engine;

// dense compute backend and softmax classification head
pub mod backend;

// cache module - fingerprints and the bounded LRU/TTL store
pub mod cache;

// circuit breaker module
pub mod circuit_breaker;

// fixed-window rate limiter
pub mod rate_limiter;

// batch scheduler
pub mod batch;

// interceptor chain around the compute core
pub mod interceptor;

// recurrent-state sessions
pub mod session;

// performance metrics
pub mod metrics;

// reference feature extractor and specimen analyzer
pub mod reference;

// orchestrator module - detect / batch_detect / health_check
pub mod orchestrator;

pub use backend::{DenseBackend, SoftmaxHead};
pub use batch::BatchScheduler;
pub use cache::{MemoryCacheStore, fingerprint};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, State as CircuitState};
pub use interceptor::{DetectContext, DetectInterceptor, InterceptOrder, InterceptorChain};
pub use metrics::{PerformanceMetrics, PerformanceSnapshot};
pub use orchestrator::{DetectionService, DetectionServiceBuilder, HealthReport, HealthStatus};
pub use rate_limiter::{RateLimitResult, RateLimitStatus, RateLimiter};
pub use reference::{BoundingBoxAnalyzer, PoolingExtractor};
pub use session::SessionArena;
pub use state_engine::{LayerState, LiquidLayerConfig, LiquidStateEngine, StateBuffer};

//! Wildlife Safari testing utilities
//!
//! Mock collaborators for exercising the detection service without real
//! models: a compute backend that can be switched into failure modes, a
//! scripted feature extractor with per-item delays, a fixed classification
//! head and an unreachable cache.

pub mod backend;
pub mod collaborators;

pub use backend::{BackendMode, MockBackend};
pub use collaborators::{FixedHead, ScriptedExtractor, UnreachableCache};

use std::sync::Arc;

use safari_foundation::{LiquidLayerConfig, LiquidStateEngine};
use safari_kernel::ComputeBackend;
use safari_kernel::config::DetectionServiceConfig;

/// Layer size used by the test configuration.
pub const TEST_LAYER_SIZE: usize = 256;

/// Smallest valid model: one 256-unit layer.
pub fn test_config() -> DetectionServiceConfig {
    let mut config = DetectionServiceConfig::default();
    config.model.layer_size = TEST_LAYER_SIZE;
    config.model.num_layers = 1;
    config
}

/// Single-layer engine driven by `backend`.
pub fn engine_with(backend: Arc<MockBackend>) -> LiquidStateEngine {
    let layer = LiquidLayerConfig::new(TEST_LAYER_SIZE, (10.0, 100.0))
        .expect("test layer config is valid");
    let backend: Arc<dyn ComputeBackend> = backend;
    LiquidStateEngine::new(layer, vec![backend]).expect("mock backend matches layer size")
}

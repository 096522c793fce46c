//! Scripted feature extractor, fixed head and an unreachable cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use safari_kernel::{
    CacheStore, ClassificationHead, DetectResult, DetectionError, DetectionInput,
    DetectionOptions, FeatureExtractor, OperationKind,
};

/// Broadcasts the first input value over `layer_size` features.
///
/// With delays configured, the item whose first value is `i` sleeps for
/// `delays[i]` before returning, which lets tests force out-of-order
/// completion.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    layer_size: usize,
    delays: Vec<Duration>,
    calls: AtomicUsize,
    completed: Mutex<Vec<usize>>,
}

impl ScriptedExtractor {
    pub fn new(layer_size: usize) -> Self {
        Self {
            layer_size,
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Item keys in the order their extraction finished.
    pub fn completion_order(&self) -> Vec<usize> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl FeatureExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _kind: OperationKind,
        input: &DetectionInput,
        _options: &DetectionOptions,
    ) -> DetectResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first = match input {
            DetectionInput::Tensor(t) => t.data.first().copied(),
            DetectionInput::Points(p) => p.points.first().map(|p| p[0]),
        }
        .ok_or_else(|| DetectionError::InvalidInput("empty input".to_string()))?;

        let key = first.max(0.0) as usize;
        if let Some(delay) = self.delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().push(key);
        Ok(vec![first; self.layer_size])
    }
}

/// Head returning the same distribution for every state.
#[derive(Debug, Clone)]
pub struct FixedHead {
    labels: Vec<String>,
    probabilities: Vec<f32>,
}

impl FixedHead {
    pub fn new(labels: &[&str], probabilities: &[f32]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            probabilities: probabilities.to_vec(),
        }
    }
}

impl ClassificationHead for FixedHead {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, _state: &[f32]) -> DetectResult<Vec<f32>> {
        Ok(self.probabilities.clone())
    }
}

/// Cache whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableCache;

#[async_trait]
impl CacheStore for UnreachableCache {
    async fn get(&self, _key: &str) -> DetectResult<Option<String>> {
        Err(DetectionError::Cache("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> DetectResult<()> {
        Err(DetectionError::Cache("connection refused".to_string()))
    }

    async fn ping(&self) -> DetectResult<()> {
        Err(DetectionError::Cache("connection refused".to_string()))
    }
}

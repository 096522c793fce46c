//! Switchable compute backend.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use safari_kernel::{ComputeBackend, DetectResult, DetectionError};

/// Behaviour of [`MockBackend::forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendMode {
    /// Return the input unchanged.
    Identity = 0,
    /// Return NaN everywhere (numeric instability).
    NaN = 1,
    /// Return a model inference error.
    Error = 2,
}

/// Identity backend whose mode can be flipped while the service runs.
#[derive(Debug)]
pub struct MockBackend {
    dim: usize,
    mode: AtomicU8,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            mode: AtomicU8::new(BackendMode::Identity as u8),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: BackendMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn mode(&self) -> BackendMode {
        match self.mode.load(Ordering::SeqCst) {
            1 => BackendMode::NaN,
            2 => BackendMode::Error,
            _ => BackendMode::Identity,
        }
    }

    /// Number of `forward` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ComputeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, input: &[f32]) -> DetectResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            BackendMode::Identity => Ok(input.to_vec()),
            BackendMode::NaN => Ok(vec![f32::NAN; input.len()]),
            BackendMode::Error => Err(DetectionError::ModelInferenceError(
                "mock backend failure".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        let backend = MockBackend::new(2);
        assert_eq!(backend.forward(&[1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        backend.set_mode(BackendMode::NaN);
        assert!(backend.forward(&[1.0, 2.0]).unwrap()[0].is_nan());
        backend.set_mode(BackendMode::Error);
        assert!(backend.forward(&[1.0, 2.0]).is_err());
        assert_eq!(backend.call_count(), 3);
    }
}

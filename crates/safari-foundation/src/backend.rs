//! Reference compute backend and classification head.
//!
//! [`DenseBackend`] is a fixed affine map `W·x + b` stored in `ndarray`
//! arrays; [`SoftmaxHead`] projects the aggregated liquid state onto a label
//! vocabulary and normalises it with a numerically stable softmax.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use safari_kernel::{ClassificationHead, ComputeBackend, DetectResult, DetectionError};

/// Dense affine transform with weights of shape `(output_dim, input_dim)`.
#[derive(Debug, Clone)]
pub struct DenseBackend {
    name: String,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseBackend {
    /// Seeded Xavier/Glorot-uniform initialisation with zero bias.
    pub fn xavier(name: impl Into<String>, input_dim: usize, output_dim: usize, seed: u64) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let weights =
            Array2::from_shape_fn((output_dim, input_dim), |_| rng.gen_range(-limit..limit));
        Self {
            name: name.into(),
            weights,
            bias: Array1::zeros(output_dim),
        }
    }

    /// `forward(x) == x`.
    pub fn identity(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            weights: Array2::eye(dim),
            bias: Array1::zeros(dim),
        }
    }

    pub fn from_parts(
        name: impl Into<String>,
        weights: Array2<f32>,
        bias: Array1<f32>,
    ) -> DetectResult<Self> {
        if weights.nrows() != bias.len() {
            return Err(DetectionError::InvalidInput(format!(
                "bias of length {} does not match {} weight rows",
                bias.len(),
                weights.nrows()
            )));
        }
        Ok(Self {
            name: name.into(),
            weights,
            bias,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

impl ComputeBackend for DenseBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    fn forward(&self, input: &[f32]) -> DetectResult<Vec<f32>> {
        if input.len() != self.input_dim() {
            return Err(DetectionError::InvalidInputShape {
                expected: self.input_dim(),
                actual: input.len(),
            });
        }
        let x = ArrayView1::from(input);
        let y = self.weights.dot(&x) + &self.bias;
        Ok(y.to_vec())
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Linear projection followed by softmax.
#[derive(Debug, Clone)]
pub struct SoftmaxHead {
    labels: Vec<String>,
    projection: DenseBackend,
}

impl SoftmaxHead {
    /// Seeded projection from `input_dim` to one logit per label.
    pub fn new(labels: Vec<String>, input_dim: usize, seed: u64) -> DetectResult<Self> {
        let projection = DenseBackend::xavier("softmax-head", input_dim, labels.len(), seed);
        Self::with_projection(labels, projection)
    }

    pub fn with_projection(labels: Vec<String>, projection: DenseBackend) -> DetectResult<Self> {
        if labels.is_empty() {
            return Err(DetectionError::InvalidInput(
                "classification head needs at least one label".to_string(),
            ));
        }
        if projection.output_dim() != labels.len() {
            return Err(DetectionError::InvalidInput(format!(
                "projection yields {} logits for {} labels",
                projection.output_dim(),
                labels.len()
            )));
        }
        Ok(Self { labels, projection })
    }

    pub fn input_dim(&self) -> usize {
        self.projection.input_dim()
    }
}

impl ClassificationHead for SoftmaxHead {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, state: &[f32]) -> DetectResult<Vec<f32>> {
        let logits = self.projection.forward(state)?;
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::ModelInferenceError(
                "classification head produced non-finite logits".to_string(),
            ));
        }
        Ok(softmax(&logits))
    }
}

//! Reference collaborators
//!
//! Framework-free stand-ins for the feature extraction network and the
//! specimen geometry pipeline. Production deployments swap these for real
//! implementations through [`DetectionServiceBuilder`](crate::orchestrator::DetectionServiceBuilder).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;

use safari_kernel::config::AgeRange;
use safari_kernel::{
    AgeEstimation, DetectResult, DetectionError, DetectionInput, DetectionOptions, FeatureExtractor,
    Measurements, OperationKind, PointSet, SpecimenAnalyzer,
};

// ============================================================================
// Feature extraction
// ============================================================================

/// Adaptive average pooling of the raw values down (or up) to `layer_size`.
#[derive(Debug, Clone)]
pub struct PoolingExtractor {
    layer_size: usize,
}

impl PoolingExtractor {
    pub fn new(layer_size: usize) -> Self {
        Self { layer_size }
    }

    pub fn layer_size(&self) -> usize {
        self.layer_size
    }
}

/// Bin `i` averages `values[floor(i*n/out) .. ceil((i+1)*n/out)]`.
pub fn adaptive_avg_pool(values: &[f32], out: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 || out == 0 {
        return vec![0.0; out];
    }
    (0..out)
        .map(|i| {
            let start = i * n / out;
            let end = ((i + 1) * n).div_ceil(out).max(start + 1);
            let window = &values[start..end];
            window.iter().sum::<f32>() / window.len() as f32
        })
        .collect()
}

/// Zero mean, unit variance. Constant inputs become all zeros.
pub fn normalize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt();
    for v in values.iter_mut() {
        *v = if std > f32::EPSILON { (*v - mean) / std } else { 0.0 };
    }
}

#[async_trait]
impl FeatureExtractor for PoolingExtractor {
    async fn extract(
        &self,
        _kind: OperationKind,
        input: &DetectionInput,
        options: &DetectionOptions,
    ) -> DetectResult<Vec<f32>> {
        let mut raw: Vec<f32> = match input {
            DetectionInput::Tensor(t) => t.data.clone(),
            DetectionInput::Points(p) => p.points.iter().flatten().copied().collect(),
        };
        if raw.is_empty() {
            return Err(DetectionError::InvalidInput("input carries no values".to_string()));
        }
        if let Some(pos) = raw.iter().position(|v| !v.is_finite()) {
            return Err(DetectionError::InvalidInput(format!(
                "input value at position {pos} is not finite"
            )));
        }
        if options.enhance {
            normalize(&mut raw);
        }
        Ok(adaptive_avg_pool(&raw, self.layer_size))
    }
}

// ============================================================================
// Specimen analysis
// ============================================================================

/// Measures specimens by their axis-aligned bounding box and dates them from
/// a per-label table.
#[derive(Debug, Clone, Default)]
pub struct BoundingBoxAnalyzer {
    age_table: BTreeMap<String, AgeRange>,
}

impl BoundingBoxAnalyzer {
    pub fn new(age_table: BTreeMap<String, AgeRange>) -> Self {
        Self { age_table }
    }

    fn bounds(points: &PointSet) -> DetectResult<([f32; 3], [f32; 3])> {
        if points.is_empty() {
            return Err(DetectionError::InvalidInput("empty point set".to_string()));
        }
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in &points.points {
            for axis in 0..3 {
                if !p[axis].is_finite() {
                    return Err(DetectionError::InvalidInput(
                        "point set contains non-finite coordinates".to_string(),
                    ));
                }
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Ok((min, max))
    }
}

#[async_trait]
impl SpecimenAnalyzer for BoundingBoxAnalyzer {
    async fn measure(&self, points: &PointSet) -> DetectResult<Measurements> {
        let (min, max) = Self::bounds(points)?;
        let length = (max[0] - min[0]) as f64;
        let width = (max[1] - min[1]) as f64;
        let height = (max[2] - min[2]) as f64;
        Ok(Measurements {
            length,
            width,
            height,
            surface_area: 2.0 * (length * width + length * height + width * height),
            volume: length * width * height,
        })
    }

    async fn estimate_age(&self, label: &str, features: &[f32]) -> DetectResult<AgeEstimation> {
        if features.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::InvalidInput(
                "age estimation features are not finite".to_string(),
            ));
        }
        let Some(range) = self.age_table.get(label) else {
            return Ok(AgeEstimation {
                estimated_age_ma: 0.0,
                lower_bound_ma: 0.0,
                upper_bound_ma: 0.0,
                reliability: 0.0,
            });
        };

        // Narrow intervals relative to the estimate are more reliable.
        let spread = (range.upper_ma - range.lower_ma) / (2.0 * range.estimate_ma.max(f64::EPSILON));
        Ok(AgeEstimation {
            estimated_age_ma: range.estimate_ma,
            lower_bound_ma: range.lower_ma,
            upper_bound_ma: range.upper_ma,
            reliability: (1.0 - spread).clamp(0.0, 1.0) as f32,
        })
    }

    /// ASCII PLY point cloud.
    async fn generate_model(&self, points: &PointSet) -> DetectResult<Vec<u8>> {
        Self::bounds(points)?;
        let mut ply = String::with_capacity(64 + points.len() * 24);
        let _ = write!(
            ply,
            "ply\nformat ascii 1.0\nelement vertex {}\nproperty float x\nproperty float y\nproperty float z\nend_header\n",
            points.len()
        );
        for [x, y, z] in &points.points {
            let _ = writeln!(ply, "{x} {y} {z}");
        }
        Ok(ply.into_bytes())
    }
}

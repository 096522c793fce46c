//! Request and result types shared by the orchestrator and its callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DetectResult, DetectionError, ErrorBody};

/// Label reported when the best class falls below the confidence threshold.
pub const UNKNOWN_LABEL: &str = "Unknown";

// ============================================================================
// Operation kind
// ============================================================================

/// The two detection pipelines served by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Wildlife species classification from an image feature tensor.
    Species,
    /// Fossil specimen classification from a 3D point set.
    Fossil,
}

impl OperationKind {
    /// Logical operation name used for rate limiting, caching and metrics.
    pub fn operation_name(&self) -> &'static str {
        match self {
            OperationKind::Species => "detect_species",
            OperationKind::Fossil => "detect_fossil",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Species => write!(f, "species"),
            OperationKind::Fossil => write!(f, "fossil"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "species" => Ok(OperationKind::Species),
            "fossil" => Ok(OperationKind::Fossil),
            other => Err(DetectionError::InvalidInput(format!(
                "unknown process type '{other}', expected 'species' or 'fossil'"
            ))),
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Dense row-major tensor (typically an image or its decoded pixels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> DetectResult<Self> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(DetectionError::InvalidInput(format!(
                "tensor shape {:?} does not match {} values",
                shape,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A flat vector tensor.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Unordered set of 3D points from a specimen scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<[f32; 3]>,
}

impl PointSet {
    pub fn new(points: Vec<[f32; 3]>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Opaque input handed to the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionInput {
    Tensor(Tensor),
    Points(PointSet),
}

impl DetectionInput {
    /// Number of scalar values carried by this input.
    pub fn element_count(&self) -> usize {
        match self {
            DetectionInput::Tensor(t) => t.len(),
            DetectionInput::Points(p) => p.len() * 3,
        }
    }

    /// Deterministic byte encoding used for fingerprinting.
    ///
    /// Negative zero is folded into positive zero so that numerically equal
    /// inputs always produce the same bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.element_count() * 4);
        let mut push = |v: f32| {
            let v = if v == 0.0 { 0.0f32 } else { v };
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        };
        match self {
            DetectionInput::Tensor(t) => {
                let mut header = vec![b'T'];
                header.extend((t.shape.len() as u64).to_le_bytes());
                for dim in &t.shape {
                    header.extend((*dim as u64).to_le_bytes());
                }
                t.data.iter().copied().for_each(&mut push);
                [header, out].concat()
            }
            DetectionInput::Points(p) => {
                let mut header = vec![b'P'];
                header.extend((p.points.len() as u64).to_le_bytes());
                p.points.iter().flatten().copied().for_each(&mut push);
                [header, out].concat()
            }
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Handle of a recurrent-state session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
    /// Overrides the configured confidence threshold for this request.
    pub confidence_threshold: Option<f32>,
    /// Apply input enhancement before feature extraction.
    pub enhance: bool,
    /// Produce 3D model bytes (fossil only).
    pub generate_3d: bool,
}

impl DetectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_enhance(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    pub fn with_generate_3d(mut self, generate: bool) -> Self {
        self.generate_3d = generate;
        self
    }

    /// Reject out-of-range option values.
    pub fn validate(&self) -> DetectResult<()> {
        if let Some(t) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(DetectionError::InvalidInput(format!(
                    "confidence_threshold must be within [0, 1], got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// A single detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub kind: OperationKind,
    pub input: DetectionInput,
    pub correlation_id: String,
    #[serde(default)]
    pub options: DetectionOptions,
    /// Recurrent-state session; `None` means an isolated, throwaway state.
    #[serde(default)]
    pub session: Option<SessionId>,
}

impl DetectionRequest {
    pub fn new(kind: OperationKind, input: DetectionInput) -> Self {
        Self {
            kind,
            input,
            correlation_id: Uuid::new_v4().to_string(),
            options: DetectionOptions::default(),
            session: None,
        }
    }

    pub fn species(tensor: Tensor) -> Self {
        Self::new(OperationKind::Species, DetectionInput::Tensor(tensor))
    }

    pub fn fossil(points: PointSet) -> Self {
        Self::new(OperationKind::Fossil, DetectionInput::Points(points))
    }

    pub fn with_options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Boundary validation: runs before any resilience or compute step.
    pub fn validate(&self) -> DetectResult<()> {
        self.options.validate()?;
        match (&self.kind, &self.input) {
            (OperationKind::Species, DetectionInput::Tensor(t)) if t.is_empty() => {
                Err(DetectionError::InvalidInput("empty input tensor".to_string()))
            }
            (OperationKind::Species, DetectionInput::Tensor(_)) => Ok(()),
            (OperationKind::Fossil, DetectionInput::Points(p)) if p.is_empty() => {
                Err(DetectionError::InvalidInput("empty point set".to_string()))
            }
            (OperationKind::Fossil, DetectionInput::Points(_)) => Ok(()),
            (kind, _) => Err(DetectionError::InvalidInput(format!(
                "input type does not match {kind} detection"
            ))),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-call metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    /// Wall time spent in the pipeline.
    pub latency_ms: f64,
    /// Approximate bytes of recurrent state touched by this call.
    pub memory_bytes: u64,
    /// Number of liquid-layer steps executed.
    pub layer_steps: u64,
    /// Whether a numeric-instability retry was needed.
    pub retried: bool,
}

/// Physical measurements of a specimen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub surface_area: f64,
    pub volume: f64,
}

/// Geological age estimate in millions of years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeEstimation {
    pub estimated_age_ma: f64,
    pub lower_bound_ma: f64,
    pub upper_bound_ma: f64,
    /// 0 when the label has no reference age.
    pub reliability: f32,
}

/// Fossil-only auxiliary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FossilReport {
    pub measurements: Measurements,
    pub age_estimation: AgeEstimation,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub model_3d: Option<Vec<u8>>,
}

/// Outcome of one detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub correlation_id: String,
    pub operation: OperationKind,
    pub label: String,
    pub confidence: f32,
    pub metrics: DetectionMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fossil: Option<FossilReport>,
    /// Served from the result cache.
    #[serde(default)]
    pub cached: bool,
}

impl DetectionResult {
    /// Whether the best class fell below the confidence threshold.
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// `detect_species` response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDetection {
    pub species: String,
    pub confidence: f32,
    pub processing_time_ms: f64,
    pub metrics: DetectionMetrics,
}

impl From<DetectionResult> for SpeciesDetection {
    fn from(result: DetectionResult) -> Self {
        Self {
            species: result.label,
            confidence: result.confidence,
            processing_time_ms: result.metrics.latency_ms,
            metrics: result.metrics,
        }
    }
}

/// `detect_fossil` response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FossilDetection {
    pub fossil_type: String,
    pub confidence: f32,
    pub measurements: Measurements,
    pub age_estimation: AgeEstimation,
    #[serde(
        rename = "3d_model",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub model_3d: Option<Vec<u8>>,
    pub processing_time_ms: f64,
}

impl TryFrom<DetectionResult> for FossilDetection {
    type Error = DetectionError;

    fn try_from(result: DetectionResult) -> Result<Self, Self::Error> {
        let report = result.fossil.ok_or_else(|| {
            DetectionError::Internal("fossil result is missing its specimen report".to_string())
        })?;
        Ok(Self {
            fossil_type: result.label,
            confidence: result.confidence,
            measurements: report.measurements,
            age_estimation: report.age_estimation,
            model_3d: report.model_3d,
            processing_time_ms: result.metrics.latency_ms,
        })
    }
}

/// One entry of a batch response, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Ok { index: usize, result: DetectionResult },
    Error { index: usize, error: ErrorBody },
}

impl BatchItemOutcome {
    pub fn index(&self) -> usize {
        match self {
            BatchItemOutcome::Ok { index, .. } | BatchItemOutcome::Error { index, .. } => *index,
        }
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            BatchItemOutcome::Ok { result, .. } => Some(result),
            BatchItemOutcome::Error { .. } => None,
        }
    }
}

/// `batch_detect` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_size: usize,
    pub successful_detections: usize,
    pub success_rate: f64,
    pub results: Vec<BatchItemOutcome>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_shape_must_match_data() {
        assert!(Tensor::new(vec![2, 2], vec![1.0; 4]).is_ok());
        assert!(matches!(
            Tensor::new(vec![2, 3], vec![1.0; 4]),
            Err(DetectionError::InvalidInput(_))
        ));
    }

    #[test]
    fn canonical_bytes_fold_negative_zero() {
        let a = DetectionInput::Tensor(Tensor::from_vec(vec![0.0, 1.5]));
        let b = DetectionInput::Tensor(Tensor::from_vec(vec![-0.0, 1.5]));
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_distinguish_shape() {
        let flat = DetectionInput::Tensor(Tensor::new(vec![4], vec![1.0; 4]).unwrap());
        let square = DetectionInput::Tensor(Tensor::new(vec![2, 2], vec![1.0; 4]).unwrap());
        assert_ne!(flat.canonical_bytes(), square.canonical_bytes());
    }

    #[test]
    fn request_rejects_mismatched_input() {
        let request = DetectionRequest::new(
            OperationKind::Fossil,
            DetectionInput::Tensor(Tensor::from_vec(vec![1.0])),
        );
        assert!(matches!(request.validate(), Err(DetectionError::InvalidInput(_))));

        let request = DetectionRequest::fossil(PointSet::new(vec![]));
        assert!(matches!(request.validate(), Err(DetectionError::InvalidInput(_))));
    }

    #[test]
    fn request_rejects_out_of_range_threshold() {
        let request = DetectionRequest::species(Tensor::from_vec(vec![1.0]))
            .with_options(DetectionOptions::new().with_confidence_threshold(1.5));
        assert!(request.validate().is_err());
    }

    #[test]
    fn operation_kind_parses() {
        assert_eq!("Species".parse::<OperationKind>().unwrap(), OperationKind::Species);
        assert!("mineral".parse::<OperationKind>().is_err());
    }

    #[test]
    fn fossil_detection_serialises_model_as_base64() {
        let result = DetectionResult {
            correlation_id: "c-1".into(),
            operation: OperationKind::Fossil,
            label: "theropod".into(),
            confidence: 0.95,
            metrics: DetectionMetrics::default(),
            fossil: Some(FossilReport {
                measurements: Measurements::default(),
                age_estimation: AgeEstimation {
                    estimated_age_ma: 68.0,
                    lower_bound_ma: 66.0,
                    upper_bound_ma: 70.0,
                    reliability: 0.8,
                },
                model_3d: Some(b"ply".to_vec()),
            }),
            cached: false,
        };

        let detection = FossilDetection::try_from(result).unwrap();
        let json = serde_json::to_value(&detection).unwrap();
        assert_eq!(json["3d_model"], "cGx5");
        assert_eq!(json["fossil_type"], "theropod");
    }
}

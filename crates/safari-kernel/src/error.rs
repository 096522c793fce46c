//! Error types for the detection service.
//!
//! [`DetectionError`] is the single error channel of every detection
//! operation. Each variant maps to a stable, machine-readable [`ErrorKind`]
//! and a human-readable message; [`ErrorBody`] is the only shape in which an
//! error leaves the service.
//!
//! Bootstrap failures (reading and validating configuration) use
//! [`KernelError`] wrapped in [`error_stack::Report`] so callers can attach
//! context while propagating.
//!
//! ```rust,ignore
//! use safari_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn load() -> KernelResult<DetectionServiceConfig> {
//!     load_service_config("detection.yml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading detection.yml")
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by detection operations.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum DetectionError {
    /// An input vector did not match the configured layer size.
    #[error("invalid input shape: expected {expected} values, got {actual}")]
    InvalidInputShape { expected: usize, actual: usize },

    /// The request failed validation before reaching the compute core.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A state update produced (or would have produced) a non-finite value.
    #[error("numeric instability in liquid layer {layer}")]
    NumericInstability { layer: usize },

    /// Inference failed after the local recovery attempt.
    #[error("model inference failed: {0}")]
    ModelInferenceError(String),

    /// The circuit breaker is rejecting calls.
    #[error("service temporarily unavailable: circuit '{breaker}' is {state}")]
    ServiceUnavailable { breaker: String, state: String },

    /// The fixed-window rate limit for an operation is exhausted.
    #[error("rate limit exceeded for '{operation}': {limit} requests per {period_secs}s")]
    RateLimitExceeded {
        operation: String,
        limit: u32,
        period_secs: u64,
        retry_after_ms: u64,
    },

    /// A batch exceeded the hard size cap and was rejected as a whole.
    #[error("batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Memory or compute limits were hit.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The request named a session that does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The cache backend could not be reached.
    #[error("cache error: {0}")]
    Cache(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable error classification exposed at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInputShape,
    InvalidInput,
    NumericInstability,
    ModelInferenceError,
    ServiceUnavailable,
    RateLimitExceeded,
    BatchTooLarge,
    ResourceExhausted,
    SessionNotFound,
    CacheUnavailable,
    Internal,
}

impl ErrorKind {
    /// The machine-readable code of this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInputShape => "INVALID_INPUT_SHAPE",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NumericInstability => "NUMERIC_INSTABILITY",
            ErrorKind::ModelInferenceError => "MODEL_INFERENCE_ERROR",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::BatchTooLarge => "BATCH_TOO_LARGE",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Serialisable error representation handed to the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl DetectionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectionError::InvalidInputShape { .. } => ErrorKind::InvalidInputShape,
            DetectionError::InvalidInput(_) => ErrorKind::InvalidInput,
            DetectionError::NumericInstability { .. } => ErrorKind::NumericInstability,
            DetectionError::ModelInferenceError(_) => ErrorKind::ModelInferenceError,
            DetectionError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            DetectionError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            DetectionError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            DetectionError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            DetectionError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            DetectionError::Cache(_) => ErrorKind::CacheUnavailable,
            DetectionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only numeric instability is recovered locally (reset + one retry).
    pub fn is_retryable(&self) -> bool {
        matches!(self, DetectionError::NumericInstability { .. })
    }

    /// Whether this error reflects a degraded compute backend and should be
    /// recorded as a circuit-breaker failure.
    pub fn counts_as_backend_failure(&self) -> bool {
        matches!(
            self,
            DetectionError::NumericInstability { .. }
                | DetectionError::ModelInferenceError(_)
                | DetectionError::ResourceExhausted(_)
                | DetectionError::Internal(_)
        )
    }

    /// Rejections issued by the resilience layer itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DetectionError::ServiceUnavailable { .. }
                | DetectionError::RateLimitExceeded { .. }
                | DetectionError::BatchTooLarge { .. }
        )
    }

    /// The boundary representation of this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Convenience alias used across the detection crates.
pub type DetectResult<T> = Result<T, DetectionError>;

/// Crate-level error for bootstrap paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// Loading or validating configuration failed.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A detection error surfaced during startup (e.g. a failed warm-up probe).
    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::{Report, ResultExt};

    #[test]
    fn every_variant_has_a_stable_code() {
        let err = DetectionError::BatchTooLarge { size: 33, max: 32 };
        assert_eq!(err.kind().code(), "BATCH_TOO_LARGE");

        let body = err.to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "BATCH_TOO_LARGE");
        assert!(json["message"].as_str().unwrap().contains("33"));
    }

    #[test]
    fn only_numeric_instability_is_retryable() {
        assert!(DetectionError::NumericInstability { layer: 1 }.is_retryable());
        assert!(!DetectionError::ModelInferenceError("boom".into()).is_retryable());
        assert!(
            !DetectionError::ServiceUnavailable {
                breaker: "species".into(),
                state: "open".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn validation_errors_do_not_trip_the_breaker() {
        assert!(!DetectionError::InvalidInputShape { expected: 4, actual: 3 }.counts_as_backend_failure());
        assert!(!DetectionError::InvalidInput("x".into()).counts_as_backend_failure());
        assert!(DetectionError::ModelInferenceError("x".into()).counts_as_backend_failure());
        assert!(DetectionError::ResourceExhausted("x".into()).counts_as_backend_failure());
    }

    #[test]
    fn rejections_are_classified() {
        let err = DetectionError::RateLimitExceeded {
            operation: "detect_species".into(),
            limit: 60,
            period_secs: 60,
            retry_after_ms: 1_000,
        };
        assert!(err.is_rejection());
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    }

    #[test]
    fn report_carries_context() {
        let result: KernelResult<()> =
            Err(Report::new(KernelError::Detection(DetectionError::Internal("root cause".into()))))
                .attach("while warming up");

        let display = format!("{:?}", result.unwrap_err());
        assert!(display.contains("root cause"));
        assert!(display.contains("while warming up"));
    }
}

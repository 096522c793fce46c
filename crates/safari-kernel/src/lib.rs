//! Wildlife Safari Kernel
//!
//! Contracts shared by every detection crate: the error taxonomy, request
//! and result types, the collaborator traits the orchestrator composes, the
//! [`Clock`](clock::Clock) abstraction and the configuration loader.

// error module
pub mod error;

// clock module
pub mod clock;

// types module
pub mod types;

// collaborator traits
pub mod backend;

// config module
pub mod config;

pub use backend::{CacheStore, ClassificationHead, ComputeBackend, FeatureExtractor, SpecimenAnalyzer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DetectionError, DetectResult, ErrorBody, ErrorKind, KernelError, KernelResult};
pub use types::*;

//! Content-addressed cache keys.

use sha2::{Digest, Sha256};

use safari_kernel::{DetectionInput, DetectionOptions, OperationKind};

/// Deterministic key over the operation, the canonical input bytes and every
/// option that changes the output.
///
/// The effective confidence threshold is hashed rather than the raw option so
/// an explicit threshold equal to the configured default shares its entry.
pub fn fingerprint(
    operation: OperationKind,
    input: &DetectionInput,
    options: &DetectionOptions,
    effective_threshold: f32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.operation_name().as_bytes());
    hasher.update([0u8]);
    hasher.update(input.canonical_bytes());
    hasher.update(effective_threshold.to_bits().to_le_bytes());
    hasher.update([options.enhance as u8, options.generate_3d as u8]);
    format!(
        "{}:{}",
        operation.operation_name(),
        hex::encode(hasher.finalize())
    )
}

//! JSON input files.

use std::path::Path;

use serde::Deserialize;

use safari_kernel::{DetectionInput, OperationKind, PointSet, Tensor};

use crate::CliError;

/// A tensor, either flat or with an explicit shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TensorFile {
    Flat(Vec<f32>),
    Shaped { shape: Vec<usize>, data: Vec<f32> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputFile {
    Tensor(TensorFile),
    Points(Vec<[f32; 3]>),
}

fn convert(kind: OperationKind, raw: InputFile) -> Result<DetectionInput, CliError> {
    match (kind, raw) {
        (OperationKind::Species, InputFile::Tensor(TensorFile::Flat(data))) => {
            Ok(DetectionInput::Tensor(Tensor::from_vec(data)))
        }
        (OperationKind::Species, InputFile::Tensor(TensorFile::Shaped { shape, data })) => {
            Ok(DetectionInput::Tensor(Tensor::new(shape, data)?))
        }
        (OperationKind::Fossil, InputFile::Points(points)) => {
            Ok(DetectionInput::Points(PointSet::new(points)))
        }
        // An empty array parses as a flat tensor
        (OperationKind::Fossil, InputFile::Tensor(TensorFile::Flat(data))) if data.is_empty() => {
            Ok(DetectionInput::Points(PointSet::new(Vec::new())))
        }
        (kind, _) => Err(CliError::Input(format!(
            "input does not look like a {kind} input"
        ))),
    }
}

/// Parse one input.
pub fn parse_input(kind: OperationKind, json: &str) -> Result<DetectionInput, CliError> {
    let raw: InputFile = serde_json::from_str(json)?;
    convert(kind, raw)
}

/// Parse a JSON array of inputs.
pub fn parse_batch(kind: OperationKind, json: &str) -> Result<Vec<DetectionInput>, CliError> {
    let raw: Vec<InputFile> = serde_json::from_str(json)?;
    raw.into_iter().map(|item| convert(kind, item)).collect()
}

pub fn read_input(kind: OperationKind, path: &Path) -> Result<DetectionInput, CliError> {
    parse_input(kind, &std::fs::read_to_string(path)?)
}

pub fn read_batch(kind: OperationKind, path: &Path) -> Result<Vec<DetectionInput>, CliError> {
    parse_batch(kind, &std::fs::read_to_string(path)?)
}

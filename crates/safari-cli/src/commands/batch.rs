//! `safari batch` command implementation

use std::path::Path;

use colored::Colorize;
use safari_kernel::{BatchItemOutcome, DetectionRequest, OperationKind};

use crate::CliError;
use crate::context::build_service;
use crate::input::read_batch;
use crate::output::{OutputFormat, print_json};

/// Execute the `safari batch` command
pub async fn run(
    config: Option<&Path>,
    kind: OperationKind,
    input: &Path,
    max_batch_size: Option<usize>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let service = build_service(config)?;
    let cap = max_batch_size.unwrap_or(service.config().model.max_batch_size);
    let requests = read_batch(kind, input)?
        .into_iter()
        .map(|input| DetectionRequest::new(kind, input))
        .collect();

    let report = service.batch_detect(requests, kind, cap).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!(
        "{} {}/{} successful ({:.0}%)",
        "batch:".green(),
        report.successful_detections,
        report.batch_size,
        report.success_rate * 100.0
    );
    for item in &report.results {
        match item {
            BatchItemOutcome::Ok { index, result } => {
                println!("  [{index}] {} ({:.2})", result.label, result.confidence);
            }
            BatchItemOutcome::Error { index, error } => {
                println!("  [{index}] {} {}", error.kind.to_string().red(), error.message);
            }
        }
    }
    Ok(())
}

//! `safari detect` command implementation

use std::path::{Path, PathBuf};

use colored::Colorize;
use safari_kernel::{
    DetectionInput, DetectionOptions, FossilDetection, OperationKind, SpeciesDetection,
};

use crate::CliError;
use crate::context::build_service;
use crate::input::read_input;
use crate::output::{OutputFormat, print_json};

pub struct DetectArgs {
    pub kind: OperationKind,
    pub input: PathBuf,
    pub threshold: Option<f32>,
    pub enhance: bool,
    pub generate_3d: bool,
}

impl DetectArgs {
    fn options(&self) -> DetectionOptions {
        let options = DetectionOptions::new()
            .with_enhance(self.enhance)
            .with_generate_3d(self.generate_3d);
        match self.threshold {
            Some(t) => options.with_confidence_threshold(t),
            None => options,
        }
    }
}

/// Execute the `safari detect` command
pub async fn run(config: Option<&Path>, args: DetectArgs, format: OutputFormat) -> Result<(), CliError> {
    let service = build_service(config)?;
    let options = args.options();

    match read_input(args.kind, &args.input)? {
        DetectionInput::Tensor(tensor) => {
            let detection = service.detect_species(tensor, options).await?;
            match format {
                OutputFormat::Json => print_json(&detection)?,
                OutputFormat::Text => print_species(&detection),
            }
        }
        DetectionInput::Points(points) => {
            let detection = service.detect_fossil(points, options).await?;
            match format {
                OutputFormat::Json => print_json(&detection)?,
                OutputFormat::Text => print_fossil(&detection),
            }
        }
    }
    Ok(())
}

fn print_species(detection: &SpeciesDetection) {
    println!(
        "{} {} ({:.1}%)",
        "species:".green(),
        detection.species.bold(),
        detection.confidence * 100.0
    );
    println!("  processing time: {:.2} ms", detection.processing_time_ms);
    println!(
        "  layer steps: {}, state memory: {} bytes",
        detection.metrics.layer_steps, detection.metrics.memory_bytes
    );
}

fn print_fossil(detection: &FossilDetection) {
    println!(
        "{} {} ({:.1}%)",
        "fossil:".green(),
        detection.fossil_type.bold(),
        detection.confidence * 100.0
    );
    let m = &detection.measurements;
    println!(
        "  size: {:.2} x {:.2} x {:.2}, surface {:.2}, volume {:.2}",
        m.length, m.width, m.height, m.surface_area, m.volume
    );
    let age = &detection.age_estimation;
    println!(
        "  age: {:.0} Ma [{:.0}, {:.0}], reliability {:.2}",
        age.estimated_age_ma, age.lower_bound_ma, age.upper_bound_ma, age.reliability
    );
    if let Some(model) = &detection.model_3d {
        println!("  3d model: {} bytes", model.len());
    }
    println!("  processing time: {:.2} ms", detection.processing_time_ms);
}

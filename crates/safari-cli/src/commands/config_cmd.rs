//! `safari config` command implementation

use std::path::Path;

use colored::Colorize;
use safari_kernel::config::DetectionServiceConfig;

use crate::CliError;
use crate::context::load_config;
use crate::output::{OutputFormat, print_json};

fn print_config(config: &DetectionServiceConfig, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text => {
            print!("{}", serde_yaml::to_string(config)?);
            Ok(())
        }
    }
}

/// Execute the `safari config show` command
pub fn run_show(path: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    print_config(&load_config(path)?, format)
}

/// Execute the `safari config validate` command
pub fn run_validate(path: Option<&Path>) -> Result<(), CliError> {
    load_config(path)?;
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    println!("{} {} is valid", "✓".green(), source);
    Ok(())
}

/// Execute the `safari config default` command
pub fn run_default(format: OutputFormat) -> Result<(), CliError> {
    print_config(&DetectionServiceConfig::default(), format)
}

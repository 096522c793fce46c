//! `safari health` command implementation

use std::path::Path;

use colored::Colorize;
use safari_foundation::HealthStatus;

use crate::CliError;
use crate::context::build_service;
use crate::output::{OutputFormat, print_json};

/// Execute the `safari health` command
pub async fn run(config: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    let service = build_service(config)?;
    let report = service.health_check().await;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    let status = match report.status {
        HealthStatus::Healthy => report.status.to_string().green(),
        HealthStatus::Degraded => report.status.to_string().yellow(),
        HealthStatus::Unhealthy => report.status.to_string().red(),
    };
    println!("status: {status}");
    for (name, model) in [("species", &report.models.species), ("fossil", &report.models.fossil)] {
        match &model.error {
            None => println!("  {name}: ok ({} labels)", model.labels),
            Some(err) => println!("  {name}: {} {err}", "failed".red()),
        }
    }
    println!("  cache: {}", if report.cache { "reachable" } else { "unavailable" });
    println!("  circuit breaker: {}", report.circuit_breaker);
    Ok(())
}

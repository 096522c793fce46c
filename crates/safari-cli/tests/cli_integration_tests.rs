//! Integration tests for the safari binary
//!
//! Each test runs the compiled binary against temporary input and config
//! files; logs go to stderr so stdout stays machine-readable.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Small model so tests stay fast.
const SMALL_CONFIG: &str = r#"
model:
  layer_size: 256
  num_layers: 1
  confidence_threshold: 0.0
"#;

fn safari(dir: &TempDir) -> Command {
    let config = dir.path().join("detection.yml");
    fs::write(&config, SMALL_CONFIG).unwrap();
    let mut cmd = Command::cargo_bin("safari").unwrap();
    cmd.env_remove("RUST_LOG").arg("--config").arg(config);
    cmd
}

#[test]
fn test_config_default_prints_documented_defaults() {
    Command::cargo_bin("safari")
        .unwrap()
        .args(["config", "default", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"confidence_threshold\": 0.9"))
        .stdout(predicate::str::contains("\"ttl_seconds\": 3600"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.yml");
    fs::write(&config, "model:\n  layer_size: 300\n").unwrap();

    Command::cargo_bin("safari")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["config", "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("layer_size"));
}

#[test]
fn test_detect_species_json_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("image.json");
    fs::write(&input, "[0.1, 0.4, 0.2, 0.9, 0.3, 0.5]").unwrap();

    safari(&dir)
        .args(["detect", "species"])
        .arg(&input)
        .args(["-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"species\""))
        .stdout(predicate::str::contains("\"processing_time_ms\""));
}

#[test]
fn test_detect_fossil_with_model() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("scan.json");
    fs::write(&input, "[[0, 0, 0], [2, 3, 4], [1, 1, 1]]").unwrap();

    safari(&dir)
        .args(["detect", "fossil", "--generate-3d", "-o", "json"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fossil_type\""))
        .stdout(predicate::str::contains("\"3d_model\""));
}

#[test]
fn test_oversized_batch_fails_with_stable_code() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("batch.json");
    let items: Vec<String> = (0..5).map(|i| format!("[{i}.0, 1.0]")).collect();
    fs::write(&input, format!("[{}]", items.join(","))).unwrap();

    safari(&dir)
        .args(["batch", "species", "--max-batch-size", "4"])
        .arg(&input)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("BATCH_TOO_LARGE"));
}

#[test]
fn test_health_reports_status() {
    let dir = TempDir::new().unwrap();
    safari(&dir)
        .args(["health", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"healthy\""))
        .stdout(predicate::str::contains("\"circuit_breaker\": \"CLOSED\""));
}

//! Configuration loading
//!
//! Format-agnostic loader (YAML, TOML, JSON, INI, RON, JSON5) with
//! `${VAR}` / `$VAR` substitution, layered merging and prefixed environment
//! overrides, plus the typed [`DetectionServiceConfig`].

mod service;

pub use service::{
    AgeRange, CacheSettings, CircuitBreakerSettings, DetectionServiceConfig, FossilSettings,
    HeadSettings, ModelSettings, RateLimitRule, RateLimitSettings, SessionSettings,
};

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

/// Prefix of environment variables overriding the service configuration,
/// e.g. `DETECTION_SERVICE__MODEL__CONFIDENCE_THRESHOLD=0.8`.
pub const ENV_PREFIX: &str = "DETECTION_SERVICE";

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid regex"));

/// Configuration errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute `${VAR}` and `$VAR` references with environment values.
///
/// Unknown variables are left untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    BARE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Read `path` into a config source after variable substitution.
fn file_source(path: &str) -> ConfigResult<File<config::FileSourceString, FileFormat>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    Ok(File::from_str(&substitute_env_vars(&content), format))
}

fn finish<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load one file, format taken from its extension.
pub fn load_config<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    finish(Cfg::builder().add_source(file_source(path)?))
}

pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    merge_configs(&[(content, format)])
}

/// Later sources override earlier ones key by key.
pub fn merge_configs<T: DeserializeOwned>(sources: &[(&str, FileFormat)]) -> ConfigResult<T> {
    let builder = sources.iter().fold(Cfg::builder(), |builder, (content, format)| {
        builder.add_source(File::from_str(&substitute_env_vars(content), *format))
    });
    finish(builder)
}

/// Optional file, then `<PREFIX>__SECTION__KEY` environment overrides.
pub fn load_with_env<T: DeserializeOwned>(path: Option<&str>, env_prefix: &str) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    if let Some(path) = path {
        builder = builder.add_source(file_source(path)?);
    }
    finish(builder.add_source(
        Environment::with_prefix(env_prefix)
            .separator("__")
            .try_parsing(true),
    ))
}

/// Load and validate the detection service configuration.
pub fn load_service_config(path: Option<&str>) -> ConfigResult<DetectionServiceConfig> {
    let config: DetectionServiceConfig = load_with_env(path, ENV_PREFIX)?;
    config.validate()?;
    tracing::info!(
        path = path.unwrap_or("<defaults>"),
        layer_size = config.model.layer_size,
        num_layers = config.model.num_layers,
        "detection service configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("config.yaml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("config.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("config.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("config.json").unwrap(), FileFormat::Json);
        assert_eq!(detect_format("config.json5").unwrap(), FileFormat::Json5);
        assert!(detect_format("config.txt").is_err());
        assert!(detect_format("config").is_err());
    }

    #[test]
    fn test_substitute_leaves_unknown_vars() {
        let out = substitute_env_vars("path: ${SAFARI_SURELY_UNSET_VAR}/models");
        assert_eq!(out, "path: ${SAFARI_SURELY_UNSET_VAR}/models");
    }

    #[test]
    fn test_merge_later_source_wins() {
        let base = r#"{ "model": { "layer_size": 512, "num_layers": 2 } }"#;
        let overlay = r#"{ "model": { "layer_size": 768 } }"#;

        let config: DetectionServiceConfig =
            merge_configs(&[(base, FileFormat::Json), (overlay, FileFormat::Json)]).unwrap();
        assert_eq!(config.model.layer_size, 768);
        assert_eq!(config.model.num_layers, 2);
    }

    #[test]
    fn test_load_service_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "model:\n  layer_size: 256\n  time_constants_range: [5, 50]\ncache:\n  ttl_seconds: 60"
        )
        .unwrap();

        let config = load_service_config(file.path().to_str()).unwrap();
        assert_eq!(config.model.layer_size, 256);
        assert_eq!(config.model.time_constants_range, (5.0, 50.0));
        assert_eq!(config.cache.ttl_seconds, 60);
        // untouched sections keep their defaults
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_load_service_config_rejects_invalid_layer_size() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[model]\nlayer_size = 300").unwrap();

        let err = load_service_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "model.layer_size"));
    }
}

//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand, ValueEnum};
use safari_kernel::OperationKind;
use std::path::PathBuf;

/// Wildlife Safari - species and fossil detection
#[derive(Parser)]
#[command(name = "safari")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<OutputFormat>,

    /// Detection service configuration file (yaml, toml, json, ini, ron, json5)
    #[arg(short = 'c', long, global = true, env = "DETECTION_SERVICE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Detection pipeline selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Species,
    Fossil,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Species => OperationKind::Species,
            KindArg::Fossil => OperationKind::Fossil,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Detect a single input
    Detect {
        /// Pipeline to run
        #[arg(value_enum)]
        kind: KindArg,

        /// JSON input file: a tensor (`[..]` or `{"shape": [..], "data": [..]}`) for
        /// species, a list of `[x, y, z]` points for fossils
        input: PathBuf,

        /// Override the configured confidence threshold
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Normalise the input before feature extraction
        #[arg(long)]
        enhance: bool,

        /// Export a 3D point-cloud model (fossil only)
        #[arg(long = "generate-3d")]
        generate_3d: bool,
    },

    /// Detect every input of a JSON array, in order
    Batch {
        /// Pipeline to run
        #[arg(value_enum)]
        kind: KindArg,

        /// JSON file holding an array of inputs
        input: PathBuf,

        /// Cap on the batch size (never above the configured maximum)
        #[arg(short, long)]
        max_batch_size: Option<usize>,
    },

    /// Probe models, cache and circuit breaker
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (file + environment overrides)
    Show,
    /// Validate the configuration and exit
    Validate,
    /// Print the built-in defaults
    Default,
}

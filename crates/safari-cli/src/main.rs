//! Wildlife Safari CLI - species and fossil detection from the command line

mod cli;
mod commands;
mod context;
mod error;
mod input;
mod output;

use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

pub use error::CliError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let rt = tokio::runtime::Runtime::new()?;
    if let Err(err) = rt.block_on(run_command_async(cli)) {
        eprintln!("{} {}", "error:".red().bold(), err);
        std::process::exit(err.exit_code());
    }
    Ok(())
}

/// `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_command_async(cli: Cli) -> Result<(), CliError> {
    let format = cli.output.unwrap_or_default();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Detect {
            kind,
            input,
            threshold,
            enhance,
            generate_3d,
        } => {
            let args = commands::detect::DetectArgs {
                kind: kind.into(),
                input,
                threshold,
                enhance,
                generate_3d,
            };
            commands::detect::run(config_path, args, format).await?;
        }

        Commands::Batch {
            kind,
            input,
            max_batch_size,
        } => {
            commands::batch::run(config_path, kind.into(), &input, max_batch_size, format).await?;
        }

        Commands::Health => {
            commands::health::run(config_path, format).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config_cmd::run_show(config_path, format)?,
            ConfigCommands::Validate => commands::config_cmd::run_validate(config_path)?,
            ConfigCommands::Default => commands::config_cmd::run_default(format)?,
        },
    }

    Ok(())
}

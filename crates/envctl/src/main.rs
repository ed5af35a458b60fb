use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;
mod providers;

#[derive(Parser)]
#[command(name = "envctl")]
#[command(about = "envctl - Kubernetes connection and port-forward manager")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "envctl.yaml")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `connection_services=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file and print the start order
    Validate,

    /// Start every service and keep them running until interrupted
    Up {
        /// Seconds between status tables
        #[arg(long, default_value = "10")]
        status_interval: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    smol::block_on(async {
        match cli.command {
            Commands::Validate => commands::validate::run(&cli.config, cli.json).await,
            Commands::Up { status_interval } => {
                commands::up::run(&cli.config, cli.json, status_interval).await
            }
        }
    })
}

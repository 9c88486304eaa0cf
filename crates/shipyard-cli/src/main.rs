//! Shipyard CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Define and synthesize software delivery stacks", long_about = None)]
struct Cli {
    /// Path to the stack configuration
    #[arg(long, env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define the stack and write the cloud assembly
    Synth {
        /// Output directory
        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,
    },
    /// Validate the configuration and the stack it defines
    Validate,
    /// Print resources in dependency order
    Graph,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { out } => {
            commands::synth::run(&cli.config, &out)?;
        }
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
        Commands::Graph => {
            commands::graph::run(&cli.config)?;
        }
        Commands::Init { force } => {
            commands::init(&cli.config, force)?;
        }
    }

    Ok(())
}

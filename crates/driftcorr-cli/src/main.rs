mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftcorr", about = "Lattice drift correction for STM data")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show layer dimensions and value statistics
    Info(commands::info::InfoArgs),
    /// Locate the Bragg peaks of a topograph
    Peaks(commands::peaks::PeaksArgs),
    /// Fit the lattice drift and resample every layer
    Correct(commands::correct::CorrectArgs),
    /// Print or save the default configuration as TOML
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Peaks(args) => commands::peaks::run(args),
        Commands::Correct(args) => commands::correct::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}

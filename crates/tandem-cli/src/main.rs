//! Tandem CLI - run, inspect and render the fault-tolerant synth engine.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about = "Fault-tolerant dual-worker synth engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the supervisor and play through an audio backend
    Run(commands::run::RunArgs),

    /// Render a patch offline to a WAV file
    Render(commands::render::RenderArgs),

    /// Check an engine config or patch file
    Validate(commands::validate::ValidateArgs),

    /// Delete shared-memory segments left by dead supervisors
    Reclaim(commands::reclaim::ReclaimArgs),

    /// List audio output devices
    Devices(commands::devices::DevicesArgs),

    /// Worker process entry point (started by the supervisor)
    #[command(hide = true)]
    Worker(commands::worker::WorkerArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::common::init_logging();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Render(args) => commands::render::run(args),
        Commands::Validate(args) => commands::validate::run(args),
        Commands::Reclaim(args) => commands::reclaim::run(args),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Worker(args) => commands::worker::run(args),
    }
}

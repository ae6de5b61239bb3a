//! Hidden worker entry point.
//!
//! The supervisor starts `tandem worker --spec <json>` for each slot. The
//! exit code tells it how the worker ended: 0 clean, 1 failed, 2 could not
//! start, 3 orphaned. An injected crash aborts the process.
//!
//! Ctrl+C in a terminal reaches the whole process group; workers ignore it
//! and stop when the supervisor sets the shutdown flag, or when it exits.

use anyhow::Context;
use clap::Args;
use tandem_engine::{WorkerSpec, worker};

#[derive(Args)]
pub struct WorkerArgs {
    /// Worker spec as JSON
    #[arg(long)]
    spec: String,
}

pub fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let spec = WorkerSpec::from_json(&args.spec).context("decoding worker spec")?;
    ctrlc::set_handler(|| {}).context("installing signal handler")?;
    let code = worker::run_process(&spec);
    std::process::exit(code);
}

//! Reclaim orphaned shared-memory segments.

use std::path::PathBuf;

use clap::Args;
use tandem_shm::SegmentRegistry;

use super::common::{load_config, runtime_dir};

#[derive(Args)]
pub struct ReclaimArgs {
    /// Engine config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Runtime directory (overrides the config)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Only list registered segments
    #[arg(long)]
    list: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: ReclaimArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let dir = runtime_dir(&config, args.runtime_dir);
    let registry = SegmentRegistry::new(&dir);

    let entries = if args.list {
        registry.entries()?
    } else {
        registry.reclaim_orphans()?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let verb = if args.list { "Registered" } else { "Reclaimed" };
    if entries.is_empty() {
        println!("{verb}: none ({})", dir.display());
        return Ok(());
    }
    println!("{verb} segments in {}:", dir.display());
    for entry in &entries {
        println!(
            "  {} (pid {}) {}",
            entry.name,
            entry.owner_pid,
            entry.path.display()
        );
    }
    Ok(())
}

//! Offline render of a patch to WAV.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tandem_core::Command;
use tandem_io::{RenderOptions, render_to_wav};

use super::common::{ParamAssign, load_config, load_patch, parse_assign};

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV file
    output: PathBuf,

    /// Engine config file (TOML); its patch is rendered unless --patch is given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Patch file (TOML)
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Length in seconds
    #[arg(short, long, default_value = "2.0")]
    duration: f64,

    /// Parameter to set before rendering, e.g. "osc1.freq=440" (repeatable)
    #[arg(long = "set", value_parser = parse_assign)]
    sets: Vec<ParamAssign>,

    /// Module to gate on before rendering (repeatable)
    #[arg(long)]
    gate: Vec<String>,

    /// Output channels
    #[arg(long, default_value = "1")]
    channels: u16,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let patch = match &args.patch {
        Some(path) => load_patch(path)?,
        None => config.patch.clone(),
    };
    if !(args.duration.is_finite() && args.duration >= 0.0) {
        anyhow::bail!("invalid duration {}", args.duration);
    }

    let mut commands = Vec::with_capacity(args.sets.len() + args.gate.len());
    for assign in &args.sets {
        commands.push(assign.to_command()?);
    }
    for module in &args.gate {
        commands.push(Command::gate(module, true).with_context(|| format!("invalid --gate {module}"))?);
    }

    let options = RenderOptions {
        sample_rate: config.audio.sample_rate,
        frame_len: config.audio.frame_len,
        duration: Duration::from_secs_f64(args.duration),
        channels: args.channels,
        warmup_ticks: config.supervisor.warmup_ticks,
    };
    let summary = render_to_wav(&args.output, &patch, &commands, &options)
        .with_context(|| format!("rendering {}", args.output.display()))?;

    println!(
        "Wrote {} ({} samples, {} ch, peak {:.3}, rms {:.3})",
        args.output.display(),
        summary.samples,
        options.channels,
        summary.peak,
        summary.rms
    );
    Ok(())
}

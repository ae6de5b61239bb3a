//! Run the supervisor against an audio backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use tandem_config::WorkerMode;
use tandem_engine::{AudioSupervisor, PatchBuilder, SupervisorContext, SupervisorStatus};
use tandem_io::{BackendStreamConfig, backend_by_name};

use super::common::{
    FaultPlan, ParamAssign, load_config, load_patch, parse_assign, parse_fault, parse_worker_mode,
};

#[derive(Args)]
pub struct RunArgs {
    /// Engine config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Audio backend: cpal or null
    #[arg(short, long, default_value = "cpal")]
    backend: String,

    /// Output device name (substring match, overrides the config)
    #[arg(long)]
    device: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration: Option<f64>,

    /// Parameter to set once running, e.g. "osc1.freq=440" (repeatable)
    #[arg(long = "set", value_parser = parse_assign)]
    sets: Vec<ParamAssign>,

    /// Module to gate on once running (repeatable)
    #[arg(long)]
    gate: Vec<String>,

    /// Patch file (TOML) to commit once running
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Fault to inject, e.g. "active:kill", "standby:hang", "1:crash"
    #[arg(long, value_parser = parse_fault)]
    fault: Option<FaultPlan>,

    /// Delay before the fault is injected, in milliseconds
    #[arg(long, default_value = "500")]
    fault_after: u64,

    /// Worker isolation: process or thread (overrides the config)
    #[arg(long, value_parser = parse_worker_mode)]
    worker_mode: Option<WorkerMode>,

    /// Print the final status as JSON on stdout
    #[arg(long)]
    json: bool,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(mode) = args.worker_mode {
        config.supervisor.worker_mode = mode;
    }
    if args.device.is_some() {
        config.audio.device = args.device.clone();
    }
    let backend = backend_by_name(&args.backend)?;
    let stream_config = BackendStreamConfig {
        sample_rate: config.audio.sample_rate,
        buffer_size: Some(config.audio.frame_len as u32),
        channels: config.audio.channels,
        device_name: config.audio.device.clone(),
    };
    let patch = args.patch.as_deref().map(load_patch).transpose()?;

    let ctx = SupervisorContext::init(config).context("preparing supervisor")?;
    let mut supervisor = AudioSupervisor::start(ctx).context("starting workers")?;

    for assign in &args.sets {
        supervisor
            .broadcast(&assign.to_command()?)
            .with_context(|| format!("setting {}.{}", assign.module, assign.param))?;
    }
    for module in &args.gate {
        supervisor
            .gate(module, true)
            .with_context(|| format!("gating {module}"))?;
    }
    if let Some(spec) = &patch {
        let cfg = supervisor.context().config();
        let builder = PatchBuilder::from_spec(spec, cfg.sample_rate(), cfg.audio.frame_len)
            .context("building patch")?;
        let report = supervisor.commit_patch(builder).context("committing patch")?;
        tracing::info!(
            generation = report.generation,
            active = report.active,
            latency_us = report.latency.as_micros() as u64,
            "patch committed"
        );
    }

    let mut boundary = supervisor.boundary(usize::from(stream_config.channels));
    let stream = backend.build_output_stream(
        &stream_config,
        Box::new(move |buf: &mut [f32]| boundary.fill(buf)),
        Box::new(|err: &str| tracing::error!(error = err, "audio stream error")),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if !args.json {
        match args.duration {
            Some(secs) => eprintln!("Running for {secs}s on {} backend...", backend.name()),
            None => eprintln!("Running on {} backend. Press Ctrl+C to stop...", backend.name()),
        }
    }

    let started = Instant::now();
    let deadline = args.duration.map(Duration::from_secs_f64);
    let fault_at = Duration::from_millis(args.fault_after);
    let mut pending_fault = args.fault;
    let mut active = supervisor.active_slot();

    while running.load(Ordering::SeqCst) {
        let elapsed = started.elapsed();
        if deadline.is_some_and(|d| elapsed >= d) {
            break;
        }
        if let Some(plan) = pending_fault
            && elapsed >= fault_at
        {
            let slot = plan.target.resolve(supervisor.active_slot());
            supervisor
                .inject_fault(slot, plan.fault)
                .with_context(|| format!("injecting {} into slot {slot}", plan.fault))?;
            pending_fault = None;
        }
        let now_active = supervisor.active_slot();
        if now_active != active {
            tracing::info!(from = active, to = now_active, "active slot changed");
            active = now_active;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    drop(stream);
    let status = supervisor.status();
    supervisor.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_summary(&status);
    }
    Ok(())
}

fn print_summary(status: &SupervisorStatus) {
    let m = &status.metrics;
    println!("Tandem run summary");
    println!("==================");
    println!("  Uptime:        {} ms", status.uptime_ms);
    println!("  Active slot:   {}", status.active_slot);
    println!("  Patch gen:     {}", status.patch_generation);
    println!("  Commands:      {}", m.commands_broadcast);
    println!(
        "  Failures:      {} crash(es), {} hang(s), {} failover(s), {} replacement(s)",
        m.crashes, m.hangs, m.failovers, m.replacements
    );
    println!(
        "  Boundary:      {} frames, {} silent, {} repeated",
        status.boundary.frames, status.boundary.silent_frames, status.boundary.repeated_frames
    );
    if m.detection.count > 0 {
        println!(
            "  Detection:     p50 {} us, max {} us",
            m.detection.p50_us, m.detection.max_us
        );
    }
    for slot in &status.slots {
        println!(
            "  Slot {}: {:?} {:?}, incarnation {}, {} buffers, {} underruns",
            slot.index, slot.role, slot.state, slot.incarnation, slot.buffers, slot.underruns
        );
    }
}

//! The worker runtime: one slot's tick loop.
//!
//! A worker maps its slot segment, builds a [`ModuleHost`] from the patch in
//! its [`WorkerSpec`], applies the seed commands, warms up, and then ticks
//! once per frame period:
//!
//! 1. drain the command ring
//! 2. render one frame and publish it to the audio ring
//! 3. publish parameters and counters, advance the heartbeat
//!
//! The loop exits when the supervisor requests shutdown, when the abort
//! flag is raised (thread workers), when an injected fault says so, or when
//! the supervisor process disappears.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tandem_core::{Command, ModuleHost, ModuleRegistry, PatchSpec};
use tandem_shm::{Control, SlotSegment, WorkerCounters};
use tracing::{debug, info, warn};

use crate::error::WorkerError;

/// How many periods behind schedule a worker may fall before it stops
/// trying to catch up.
const MAX_LAG_PERIODS: u32 = 8;

/// Ticks between orphan checks.
const WATCHDOG_TICKS: u32 = 32;

/// Payload type of a seed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedKind {
    /// `SET` with a FLOAT value.
    Float,
    /// `SET` with a BOOL value.
    Bool,
    /// `GATE`.
    Gate,
}

/// One command applied, immediately, before a worker's first tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedCommand {
    /// Module id.
    pub module: String,
    /// Parameter id.
    pub param: String,
    /// Payload type.
    pub kind: SeedKind,
    /// Value (0/1 for BOOL and GATE).
    pub value: f64,
}

impl SeedCommand {
    /// Validated command with the IMMEDIATE flag set.
    pub fn to_command(&self) -> Result<Command, tandem_core::CommandError> {
        let cmd = match self.kind {
            SeedKind::Float => Command::set(&self.module, &self.param, self.value)?,
            SeedKind::Bool => Command::set_bool(&self.module, &self.param, self.value != 0.0)?,
            SeedKind::Gate => Command::gate(&self.module, self.value != 0.0)?,
        };
        Ok(cmd.with_immediate(true))
    }
}

/// Everything a worker needs to start, shipped as JSON to worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Slot index (0 or 1).
    pub slot: usize,
    /// Slot segment to map.
    pub segment: PathBuf,
    /// Patch to build.
    pub patch: PatchSpec,
    /// Generation number of `patch`.
    pub patch_generation: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per frame.
    pub frame_len: usize,
    /// Frames rendered and discarded before the first published tick.
    pub warmup_ticks: usize,
    /// State to apply before warm-up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed: Vec<SeedCommand>,
    /// Supervisor process to watch; the worker exits once it is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_pid: Option<u32>,
}

impl WorkerSpec {
    /// Serialises the spec for a worker command line.
    pub fn to_json(&self) -> Result<String, WorkerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a spec from a worker command line.
    pub fn from_json(json: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Duration of one tick.
    pub fn period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_millis(1);
        }
        Duration::from_secs_f64(self.frame_len as f64 / f64::from(self.sample_rate))
    }
}

/// A failure the supervisor can ask a worker to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fault {
    /// Forceful termination by the supervisor (SIGKILL for processes).
    Kill,
    /// Abort the worker process; thread workers return an error.
    Crash,
    /// Stop ticking and beating while staying alive.
    Hang,
    /// Exit cleanly without being asked.
    Exit,
}

impl Fault {
    /// Control-block code, or `None` for faults the supervisor applies
    /// itself.
    pub(crate) fn code(self) -> Option<u64> {
        match self {
            Fault::Kill => None,
            Fault::Crash => Some(1),
            Fault::Hang => Some(2),
            Fault::Exit => Some(3),
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Fault::Crash),
            2 => Some(Fault::Hang),
            3 => Some(Fault::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fault::Kill => "kill",
            Fault::Crash => "crash",
            Fault::Hang => "hang",
            Fault::Exit => "exit",
        })
    }
}

impl FromStr for Fault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kill" => Ok(Fault::Kill),
            "crash" => Ok(Fault::Crash),
            "hang" => Ok(Fault::Hang),
            "exit" => Ok(Fault::Exit),
            other => Err(format!("unknown fault '{other}' (kill, crash, hang, exit)")),
        }
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "detail")]
pub enum WorkerExit {
    /// Exited on its own or on request.
    Clean,
    /// Terminated by the supervisor.
    Killed,
    /// Exited because its supervisor disappeared.
    Orphaned,
    /// Crashed or exited with an error.
    Failed(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Clean => f.write_str("clean exit"),
            WorkerExit::Killed => f.write_str("killed"),
            WorkerExit::Orphaned => f.write_str("orphaned"),
            WorkerExit::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Watches for the supervisor process going away.
struct ParentWatchdog {
    supervisor: Option<u32>,
    ticks: u32,
}

impl ParentWatchdog {
    fn new(supervisor: Option<u32>) -> Self {
        Self {
            supervisor,
            ticks: 0,
        }
    }

    fn orphaned(&mut self) -> bool {
        let Some(pid) = self.supervisor else {
            return false;
        };
        self.ticks += 1;
        if self.ticks < WATCHDOG_TICKS {
            return false;
        }
        self.ticks = 0;
        #[cfg(unix)]
        {
            // Reparenting means the supervisor is gone.
            std::os::unix::process::parent_id() != pid
        }
        #[cfg(not(unix))]
        {
            !tandem_shm::process_alive(pid)
        }
    }
}

/// Runs a worker until it is told to stop.
///
/// `abort` is the thread-launcher kill switch; process workers pass a flag
/// that is never set. Returns how the worker ended; injected crashes come
/// back as [`WorkerError::InjectedCrash`].
pub fn run(spec: &WorkerSpec, abort: &AtomicBool) -> Result<WorkerExit, WorkerError> {
    let span = tracing::info_span!("worker", slot = spec.slot);
    let _entered = span.enter();

    let segment = SlotSegment::open(&spec.segment)?;
    let frame_len = segment.layout().frame_len;
    if frame_len != spec.frame_len {
        return Err(WorkerError::FrameMismatch {
            segment: frame_len,
            worker: spec.frame_len,
        });
    }
    let audio = segment.audio();
    let mut commands = segment.commands();
    let control = segment.control();
    let params = segment.params();

    let registry = ModuleRegistry::new();
    let mut host = ModuleHost::from_spec(
        &spec.patch,
        &registry,
        spec.sample_rate as f32,
        frame_len,
    )?;
    for seed in &spec.seed {
        host.apply(&seed.to_command()?);
    }
    host.commit(spec.warmup_ticks)?;

    let pid = std::process::id();
    control.set_worker_pid(pid);
    control.set_patch_generation(spec.patch_generation);
    info!(
        pid,
        generation = spec.patch_generation,
        modules = host.module_count(),
        seeded = spec.seed.len(),
        "worker started"
    );

    let period = spec.period();
    let mut watchdog = ParentWatchdog::new(spec.supervisor_pid);
    let mut out = vec![0.0f32; frame_len];
    let mut ready = false;
    let mut next = Instant::now();

    loop {
        if abort.load(Ordering::Acquire) {
            return Ok(WorkerExit::Killed);
        }
        if control.shutdown_requested() {
            info!("shutdown requested");
            return Ok(WorkerExit::Clean);
        }
        match Fault::from_code(control.pending_fault()) {
            Some(Fault::Crash) => {
                warn!("injected crash");
                return Err(WorkerError::InjectedCrash);
            }
            Some(Fault::Hang) => {
                warn!("injected hang");
                return Ok(hang(&control, abort));
            }
            Some(Fault::Exit) => {
                warn!("injected exit");
                return Ok(WorkerExit::Clean);
            }
            Some(Fault::Kill) | None => {}
        }

        host.tick(&mut commands, &mut out);
        audio.write(&out);
        params.publish(|table| {
            host.for_each_param(|module, param, current, target| {
                table.push(module, param, current, target);
            });
        });
        control.publish_counters(WorkerCounters {
            buffers: host.buffers_processed(),
            commands: host.commands_processed(),
            rejected: host.commands_rejected(),
            dropped: host.commands_dropped(),
        });
        control.beat();
        if !ready {
            control.set_ready(true);
            ready = true;
            debug!("first heartbeat published");
        }

        if watchdog.orphaned() {
            warn!("supervisor gone, exiting");
            return Ok(WorkerExit::Orphaned);
        }

        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else if now - next > period * MAX_LAG_PERIODS {
            debug!(behind_us = (now - next).as_micros() as u64, "worker fell behind, resyncing clock");
            next = now;
        }
    }
}

/// Stays alive without beating until killed or asked to stop.
fn hang(control: &Control, abort: &AtomicBool) -> WorkerExit {
    loop {
        if abort.load(Ordering::Acquire) {
            return WorkerExit::Killed;
        }
        if control.shutdown_requested() {
            return WorkerExit::Clean;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Entry point of a worker process.
///
/// Returns the process exit code. An injected crash aborts the process so
/// the supervisor observes a genuine abnormal exit.
pub fn run_process(spec: &WorkerSpec) -> i32 {
    let never = AtomicBool::new(false);
    match run(spec, &never) {
        Ok(WorkerExit::Clean | WorkerExit::Killed) => 0,
        Ok(WorkerExit::Orphaned) => 3,
        Ok(WorkerExit::Failed(_)) => 1,
        Err(WorkerError::InjectedCrash) => std::process::abort(),
        Err(e) => {
            tracing::error!(slot = spec.slot, error = %e, "worker failed");
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tandem_shm::SegmentLayout;

    use super::*;

    fn spec(dir: &tempfile::TempDir, frame_len: usize) -> (WorkerSpec, SlotSegment) {
        let layout = SegmentLayout::new(4, frame_len, 64, 64).unwrap();
        let path = dir.path().join("slot0.shm");
        let segment = SlotSegment::create(&path, layout).unwrap();
        let spec = WorkerSpec {
            slot: 0,
            segment: path,
            patch: PatchSpec::default_voice(),
            patch_generation: 1,
            sample_rate: 48000,
            frame_len,
            warmup_ticks: 2,
            seed: vec![SeedCommand {
                module: "osc1".into(),
                param: "freq".into(),
                kind: SeedKind::Float,
                value: 330.0,
            }],
            supervisor_pid: None,
        };
        (spec, segment)
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn spec_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, _segment) = spec(&dir, 64);
        let back = WorkerSpec::from_json(&spec.to_json().unwrap()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn fault_parsing() {
        assert_eq!("KILL".parse::<Fault>(), Ok(Fault::Kill));
        assert_eq!("hang".parse::<Fault>(), Ok(Fault::Hang));
        assert!("melt".parse::<Fault>().is_err());
        for fault in [Fault::Crash, Fault::Hang, Fault::Exit] {
            assert_eq!(Fault::from_code(fault.code().unwrap()), Some(fault));
        }
        assert_eq!(Fault::Kill.code(), None);
    }

    #[test]
    fn worker_ticks_publishes_and_stops_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, segment) = spec(&dir, 64);
        let abort = Arc::new(AtomicBool::new(false));
        let handle = {
            let abort = Arc::clone(&abort);
            std::thread::spawn(move || run(&spec, &abort))
        };

        let control = segment.control();
        assert!(wait_for(|| control.is_ready()));
        assert!(wait_for(|| control.heartbeat() >= 5));
        assert_eq!(control.patch_generation(), 1);
        assert_eq!(segment.params().get("osc1", "freq"), Some((330.0, 330.0)));

        let record = Command::set("filt1", "cutoff", 500.0)
            .unwrap()
            .with_immediate(true)
            .encode()
            .unwrap();
        assert!(segment.commands().try_write(&record));
        assert!(wait_for(|| segment.params().get("filt1", "cutoff") == Some((500.0, 500.0))));
        assert!(wait_for(|| control.counters().commands >= 1));

        let mut frame = vec![0.0; 64];
        assert!(segment.audio().read_latest(&mut frame).has_audio());

        control.request_shutdown();
        assert_eq!(handle.join().unwrap().unwrap(), WorkerExit::Clean);
    }

    #[test]
    fn hang_stops_heartbeat_until_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, segment) = spec(&dir, 64);
        let abort = Arc::new(AtomicBool::new(false));
        let handle = {
            let abort = Arc::clone(&abort);
            std::thread::spawn(move || run(&spec, &abort))
        };
        let control = segment.control();
        assert!(wait_for(|| control.is_ready()));

        control.inject_fault(Fault::Hang.code().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        let beat = control.heartbeat();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(control.heartbeat(), beat);
        assert!(!handle.is_finished());

        abort.store(true, Ordering::Release);
        assert_eq!(handle.join().unwrap().unwrap(), WorkerExit::Killed);
    }

    #[test]
    fn injected_crash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, segment) = spec(&dir, 64);
        segment.control().inject_fault(Fault::Crash.code().unwrap());
        let abort = AtomicBool::new(false);
        assert!(matches!(
            run(&spec, &abort),
            Err(WorkerError::InjectedCrash)
        ));
    }

    #[test]
    fn frame_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut spec, _segment) = spec(&dir, 64);
        spec.frame_len = 128;
        let abort = AtomicBool::new(false);
        assert!(matches!(
            run(&spec, &abort),
            Err(WorkerError::FrameMismatch { .. })
        ));
    }

    #[test]
    fn unknown_kind_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let (mut spec, _segment) = spec(&dir, 64);
        spec.patch = PatchSpec::chain().with_module(tandem_core::ModuleSpec::new("x", "theremin"));
        let abort = AtomicBool::new(false);
        assert!(matches!(run(&spec, &abort), Err(WorkerError::Host(_))));
    }
}

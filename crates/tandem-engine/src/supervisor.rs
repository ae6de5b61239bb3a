//! The dual-slot supervisor.
//!
//! An [`AudioSupervisor`] owns two worker slots. One is *active* and feeds
//! the [`AudioBoundary`]; the other is a *standby* that receives every
//! command and therefore holds the same module state. When the active
//! worker dies or hangs the boundary is repointed at the standby in O(1),
//! and a replacement for the failed slot is built in the background, seeded
//! from the [`ParamMirror`] so it joins lockstep from its first tick.
//!
//! # Locking
//!
//! The audio path takes no locks: it reads [`SharedOutput`] atomics only.
//! Control-side locks are always taken in the order mirror → slot. The
//! monitor takes slot locks only, one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use serde::Serialize;
use tandem_config::WorkerMode;
use tandem_core::{ACTIVE_PARAM, Command, PatchSpec};
use tandem_shm::{CommandRing, ShmError, SlotSegment};
use tracing::{debug, error, info, warn};

use crate::boundary::{AudioBoundary, SharedOutput};
use crate::context::SupervisorContext;
use crate::error::{Result, SupervisorError};
use crate::launcher::WorkerHandle;
use crate::metrics::SupervisorMetrics;
use crate::mirror::ParamMirror;
use crate::monitor::{self, MonitorEvent};
use crate::patch::PatchBuilder;
use crate::slot::{SlotState, WorkerSlot};
use crate::status::{ParamStatus, SlotRole, SupervisorStatus};
use crate::worker::{Fault, WorkerSpec};

/// The patch new workers are built from.
#[derive(Debug, Clone)]
pub(crate) struct LivePatch {
    pub spec: PatchSpec,
    pub generation: u64,
}

/// State shared by the supervisor handle, the monitor and rebuild threads.
pub(crate) struct Shared {
    pub ctx: SupervisorContext,
    pub output: Arc<SharedOutput>,
    pub slots: [Mutex<WorkerSlot>; 2],
    /// Also serialises broadcasts against replacement seeding.
    pub mirror: Mutex<ParamMirror>,
    pub live: Mutex<LivePatch>,
    pub commit_lock: Mutex<()>,
    pub metrics: SupervisorMetrics,
    pub stopping: AtomicBool,
    pub events: Sender<MonitorEvent>,
    pub started_at: Instant,
    pub poll_us: AtomicU64,
    rebuilds: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn wake(&self) {
        let _ = self.events.send(MonitorEvent::Wake);
    }

    pub fn push_rebuild(&self, handle: JoinHandle<()>) {
        let mut rebuilds = self.rebuilds.lock();
        rebuilds.retain(|h| !h.is_finished());
        rebuilds.push(handle);
    }
}

/// Outcome of a successful [`AudioSupervisor::commit_patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Slot that was active before the commit; it keeps running the
    /// previous patch until it is resynchronised.
    pub previous: usize,
    /// Slot now active, running the new patch.
    pub active: usize,
    /// Generation of the new patch.
    pub generation: u64,
    /// Time from commit start to the swap.
    #[serde(with = "duration_us")]
    pub latency: Duration,
}

mod duration_us {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }
}

/// Fault-tolerant dual-worker audio engine.
pub struct AudioSupervisor {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl AudioSupervisor {
    /// Creates both slot segments, starts both workers on the configured
    /// patch and waits until each has published its first frame.
    ///
    /// Slot 0 starts active.
    pub fn start(ctx: SupervisorContext) -> Result<Self> {
        let layout = ctx.layout()?;
        let pid = std::process::id();
        let mut segments = Vec::with_capacity(2);
        for index in 0..2 {
            let path = ctx.segment_path(index);
            let segment = SlotSegment::create(&path, layout)?;
            ctx.registry()
                .register(&ctx.segment_name(index), &path, pid)?;
            segments.push(segment);
        }
        let seg1 = segments.pop().ok_or(SupervisorError::InvalidSlot(1))?;
        let seg0 = segments.pop().ok_or(SupervisorError::InvalidSlot(0))?;

        let config = ctx.config().clone();
        let output = Arc::new(SharedOutput::new(
            [seg0.audio(), seg1.audio()],
            config.rings.underrun_hold,
        ));
        let (events, receiver) = unbounded();
        let shared = Arc::new(Shared {
            output,
            slots: [
                Mutex::new(WorkerSlot::new(0, seg0)),
                Mutex::new(WorkerSlot::new(1, seg1)),
            ],
            mirror: Mutex::new(ParamMirror::new()),
            live: Mutex::new(LivePatch {
                spec: config.patch.clone(),
                generation: 1,
            }),
            commit_lock: Mutex::new(()),
            metrics: SupervisorMetrics::new(),
            stopping: AtomicBool::new(false),
            events,
            started_at: Instant::now(),
            poll_us: AtomicU64::new(config.supervisor.poll_interval().as_micros() as u64),
            rebuilds: Mutex::new(Vec::new()),
            ctx,
        });

        let mut supervisor = Self {
            shared,
            monitor: None,
        };
        let timeout = config.supervisor.spawn_timeout();
        for index in 0..2 {
            if let Err(e) = start_worker(&supervisor.shared, index, &config.patch, 1, timeout, false) {
                error!(slot = index, error = %e, "worker failed to start");
                supervisor.shutdown();
                return Err(e);
            }
        }
        supervisor.shared.output.set_active(0);

        let shared = Arc::clone(&supervisor.shared);
        let handle = std::thread::Builder::new()
            .name("tandem-monitor".to_string())
            .spawn(move || monitor::run(&shared, &receiver))
            .map_err(SupervisorError::Thread);
        match handle {
            Ok(handle) => supervisor.monitor = Some(handle),
            Err(e) => {
                supervisor.shutdown();
                return Err(e);
            }
        }

        info!(
            session = supervisor.shared.ctx.session(),
            mode = ?supervisor.shared.ctx.launcher().mode(),
            frame_len = config.audio.frame_len,
            sample_rate = config.audio.sample_rate,
            "supervisor started"
        );
        Ok(supervisor)
    }

    /// A reader for the audio callback producing `channels` interleaved
    /// channels.
    pub fn boundary(&self, channels: usize) -> AudioBoundary {
        AudioBoundary::new(Arc::clone(&self.shared.output), channels)
    }

    /// The session context.
    pub fn context(&self) -> &SupervisorContext {
        &self.shared.ctx
    }

    /// Live counters and histograms.
    pub fn metrics(&self) -> &SupervisorMetrics {
        &self.shared.metrics
    }

    /// Slot feeding the boundary.
    pub fn active_slot(&self) -> usize {
        self.shared.output.active()
    }

    // --- Commands ---

    /// Sends `cmd` to every slot that accepts commands.
    ///
    /// The command is recorded in the parameter mirror first, so a worker
    /// built later starts with its effect applied. A full standby ring marks
    /// that standby desynchronised (the monitor rebuilds it); a full active
    /// ring is reported as an error.
    pub fn broadcast(&self, cmd: &Command) -> Result<()> {
        let shared = &self.shared;
        if shared.is_stopping() {
            return Err(SupervisorError::ShuttingDown);
        }
        let record = cmd.encode()?;
        let timeout = shared.ctx.config().supervisor.command_write_timeout();
        let active = shared.output.active();
        let mut active_err: Option<ShmError> = None;
        let mut desynced = false;

        {
            let mut mirror = shared.mirror.lock();
            mirror.record(cmd);

            let mut targets: [Option<(CommandRing, bool)>; 2] = [None, None];
            for (index, target) in targets.iter_mut().enumerate() {
                let slot = shared.slots[index].lock();
                if slot.accepting {
                    *target = Some((slot.segment.commands(), slot.state == SlotState::Running));
                }
            }

            for (index, target) in targets.into_iter().enumerate() {
                let Some((ring, running)) = target else {
                    continue;
                };
                let written = if running {
                    ring.write(&record, timeout)
                } else if ring.try_write(&record) {
                    Ok(())
                } else {
                    Err(ShmError::RingFull { waited_ms: 0 })
                };
                let Err(e) = written else {
                    continue;
                };
                if index == active {
                    active_err = Some(e);
                } else {
                    warn!(slot = index, error = %e, "standby missed a command, scheduling resync");
                    shared.slots[index].lock().desynced = true;
                    SupervisorMetrics::bump(&shared.metrics.standby_desyncs);
                    desynced = true;
                }
            }
        }

        SupervisorMetrics::bump(&shared.metrics.commands_broadcast);
        if desynced {
            shared.wake();
        }
        if !shared.output.any_healthy() {
            return Err(SupervisorError::NoViableWorker);
        }
        match active_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Broadcasts `SET <module> <param> = value`.
    pub fn set_param(&self, module: &str, param: &str, value: f64) -> Result<()> {
        self.broadcast(&Command::set(module, param, value)?)
    }

    /// Broadcasts a gate on or off.
    pub fn gate(&self, module: &str, on: bool) -> Result<()> {
        self.broadcast(&Command::gate(module, on)?)
    }

    /// Broadcasts a module's activity flag.
    pub fn set_active(&self, module: &str, active: bool) -> Result<()> {
        self.broadcast(&Command::set_bool(module, ACTIVE_PARAM, active)?)
    }

    // --- Patches ---

    /// Starts a graph build session seeded with the live patch.
    pub fn begin_patch(&self) -> Result<PatchBuilder> {
        let audio = &self.shared.ctx.config().audio;
        let spec = self.shared.live.lock().spec.clone();
        Ok(PatchBuilder::from_spec(
            &spec,
            audio.sample_rate as f32,
            audio.frame_len,
        )?)
    }

    /// Starts an empty graph build session.
    pub fn begin_empty_patch(&self) -> PatchBuilder {
        let audio = &self.shared.ctx.config().audio;
        PatchBuilder::new(audio.sample_rate as f32, audio.frame_len)
    }

    /// Makes `builder`'s patch live.
    ///
    /// The patch is validated, the standby is rebuilt with it (seeded from
    /// the mirror) and, once it has produced its first frame, the boundary
    /// is swapped to it. Mirrored state of modules the new patch lacks is
    /// dropped. The previously active slot keeps running the old
    /// patch; with `resync_after_commit` it is then rebuilt with the new one.
    ///
    /// Fails without touching the active slot if validation or the standby
    /// start fails.
    pub fn commit_patch(&self, builder: PatchBuilder) -> Result<CommitReport> {
        let shared = &self.shared;
        if shared.is_stopping() {
            return Err(SupervisorError::ShuttingDown);
        }
        let spec = builder.finish()?;
        let started = Instant::now();
        let config = &shared.ctx.config().supervisor;
        let timeout = config.commit_timeout();

        let _commit = shared.commit_lock.lock();
        let active = shared.output.active();
        if !shared.output.is_healthy(active) {
            return Err(SupervisorError::NoViableWorker);
        }
        let standby = 1 - active;
        claim(shared, standby, started, timeout)?;

        let generation = shared.live.lock().generation + 1;
        let result = start_worker(shared, standby, &spec, generation, timeout, true);
        shared.slots[standby].lock().rebuilding = false;
        if let Err(e) = result {
            warn!(slot = standby, error = %e, "commit aborted, standby failed to start");
            shared.wake();
            return Err(e);
        }

        {
            let mut mirror = shared.mirror.lock();
            mirror.retain_modules(spec.modules.iter().map(|m| m.id.as_str()));
            let mut live = shared.live.lock();
            live.spec = spec;
            live.generation = generation;
        }
        let previous = shared.output.set_active(standby);
        let latency = started.elapsed();
        SupervisorMetrics::bump(&shared.metrics.commits);
        shared.metrics.commit.record(latency);
        info!(
            previous,
            active = standby,
            generation,
            latency_us = latency.as_micros() as u64,
            "patch committed"
        );

        if config.resync_after_commit {
            monitor::spawn_rebuild(shared, previous);
        }
        Ok(CommitReport {
            previous,
            active: standby,
            generation,
            latency,
        })
    }

    // --- Faults ---

    /// Injects a fault into `slot`'s worker.
    pub fn inject_fault(&self, slot: usize, fault: Fault) -> Result<()> {
        let cell = self
            .shared
            .slots
            .get(slot)
            .ok_or(SupervisorError::InvalidSlot(slot))?;
        let mut slot_guard = cell.lock();
        match fault.code() {
            None => {
                if let Some(handle) = slot_guard.handle.as_mut() {
                    handle.kill();
                }
            }
            Some(code) => slot_guard.segment.control().inject_fault(code),
        }
        info!(slot, %fault, "fault injected");
        Ok(())
    }

    // --- Inspection ---

    /// Snapshot of both slots, metrics and boundary counters.
    pub fn status(&self) -> SupervisorStatus {
        let shared = &self.shared;
        let active = shared.output.active();
        let slots = shared
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let role = if index == active {
                    SlotRole::Active
                } else {
                    SlotRole::Standby
                };
                slot.lock().status(role)
            })
            .collect();
        SupervisorStatus {
            active_slot: active,
            viable: shared.output.any_healthy(),
            patch_generation: shared.live.lock().generation,
            uptime_ms: shared.started_at.elapsed().as_millis() as u64,
            poll_interval_us: shared.poll_us.load(Ordering::Relaxed),
            slots,
            metrics: shared.metrics.snapshot(),
            boundary: shared.output.stats(),
        }
    }

    /// Parameters published by `slot`'s worker.
    pub fn slot_params(&self, slot: usize) -> Result<Vec<ParamStatus>> {
        let cell = self
            .shared
            .slots
            .get(slot)
            .ok_or(SupervisorError::InvalidSlot(slot))?;
        let role = if slot == self.active_slot() {
            SlotRole::Active
        } else {
            SlotRole::Standby
        };
        Ok(cell.lock().status(role).params)
    }

    /// Waits until both slots run, are healthy and no rebuild is pending.
    pub fn wait_healthy(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let healthy = (0..2).all(|index| {
                let slot = self.shared.slots[index].lock();
                slot.state == SlotState::Running
                    && !slot.rebuilding
                    && !slot.desynced
                    && self.shared.output.is_healthy(index)
            });
            if healthy {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // --- Lifecycle ---

    /// Stops the monitor, pending rebuilds and both workers, and drops the
    /// session's registry entries. Idempotent.
    pub fn shutdown(&mut self) {
        let shared = &self.shared;
        if shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = shared.events.send(MonitorEvent::Shutdown);
        if let Some(handle) = self.monitor.take()
            && handle.join().is_err()
        {
            error!("monitor thread panicked");
        }
        let rebuilds = std::mem::take(&mut *shared.rebuilds.lock());
        for handle in rebuilds {
            let _ = handle.join();
        }

        let timeout = shared.ctx.config().supervisor.shutdown_timeout();
        for (index, cell) in shared.slots.iter().enumerate() {
            let mut slot = cell.lock();
            slot.accepting = false;
            shared.output.set_healthy(index, false);
            if let Some(handle) = slot.handle.take() {
                let control = slot.segment.control();
                terminate(index, handle, &control, timeout, true);
            }
            slot.state = SlotState::Stopped;
        }
        shared.ctx.teardown();
        info!(session = shared.ctx.session(), "supervisor stopped");
    }
}

impl Drop for AudioSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AudioSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSupervisor")
            .field("session", &self.shared.ctx.session())
            .field("active", &self.shared.output.active())
            .finish_non_exhaustive()
    }
}

/// Reserves `index` for the caller, waiting out a rebuild in progress.
fn claim(shared: &Shared, index: usize, started: Instant, timeout: Duration) -> Result<()> {
    loop {
        {
            let mut slot = shared.slots[index].lock();
            if !slot.rebuilding {
                slot.rebuilding = true;
                return Ok(());
            }
        }
        if shared.is_stopping() {
            return Err(SupervisorError::ShuttingDown);
        }
        if started.elapsed() >= timeout {
            return Err(SupervisorError::StartupTimeout {
                slot: index,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Stops a worker: asks it to exit when `graceful`, kills it otherwise or
/// when it does not comply in time.
pub(crate) fn terminate(
    index: usize,
    mut handle: Box<dyn WorkerHandle>,
    control: &tandem_shm::Control,
    timeout: Duration,
    graceful: bool,
) {
    if graceful {
        control.request_shutdown();
        if let Some(exit) = handle.wait(timeout) {
            debug!(slot = index, %exit, "worker stopped");
            return;
        }
        warn!(slot = index, "worker ignored shutdown request, killing");
    }
    handle.kill();
    if handle.wait(timeout).is_none() {
        error!(slot = index, "worker did not exit after kill");
    }
}

/// Starts a fresh worker in slot `index` running `patch`.
///
/// Any previous worker in the slot is terminated first and the segment is
/// recycled. The seed snapshot and the switch to accepting broadcasts happen
/// under the mirror lock, so the new worker sees every command exactly once:
/// either in its seed or in its ring. Returns the time to first frame.
pub(crate) fn start_worker(
    shared: &Shared,
    index: usize,
    patch: &PatchSpec,
    generation: u64,
    timeout: Duration,
    graceful: bool,
) -> Result<Duration> {
    let started = Instant::now();
    let config = shared.ctx.config();

    let (old, control) = {
        let mut slot = shared.slots[index].lock();
        slot.accepting = false;
        slot.state = SlotState::Replacing;
        shared.output.set_healthy(index, false);
        (slot.handle.take(), slot.segment.control())
    };
    if let Some(handle) = old {
        terminate(index, handle, &control, config.supervisor.shutdown_timeout(), graceful);
    }

    let spec = {
        let mirror = shared.mirror.lock();
        let mut slot = shared.slots[index].lock();
        slot.segment.recycle();
        slot.accepting = true;
        slot.desynced = false;
        slot.state = SlotState::Spawning;
        slot.incarnation += 1;
        slot.patch_generation = generation;
        WorkerSpec {
            slot: index,
            segment: slot.segment.path().to_path_buf(),
            patch: patch.clone(),
            patch_generation: generation,
            sample_rate: config.audio.sample_rate,
            frame_len: config.audio.frame_len,
            warmup_ticks: config.supervisor.warmup_ticks,
            seed: mirror.seed(),
            // Thread workers share the supervisor's process.
            supervisor_pid: match shared.ctx.launcher().mode() {
                WorkerMode::Process => Some(std::process::id()),
                WorkerMode::Thread => None,
            },
        }
    };

    let fail = |reason: SupervisorError| {
        let mut slot = shared.slots[index].lock();
        slot.accepting = false;
        slot.state = SlotState::Dead;
        reason
    };

    let mut handle = match shared.ctx.launcher().launch(&spec) {
        Ok(handle) => handle,
        Err(e) => return Err(fail(e.into())),
    };
    debug!(
        slot = index,
        pid = handle.pid(),
        generation,
        seeded = spec.seed.len(),
        "worker launched"
    );

    loop {
        if control.is_ready() {
            break;
        }
        if let Some(exit) = handle.try_exit() {
            return Err(fail(SupervisorError::WorkerExited {
                slot: index,
                reason: exit.to_string(),
            }));
        }
        if shared.is_stopping() {
            handle.kill();
            let _ = handle.wait(timeout);
            return Err(fail(SupervisorError::ShuttingDown));
        }
        if started.elapsed() >= timeout {
            handle.kill();
            let _ = handle.wait(timeout);
            return Err(fail(SupervisorError::StartupTimeout {
                slot: index,
                timeout_ms: timeout.as_millis() as u64,
            }));
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let now = Instant::now();
    {
        let mut slot = shared.slots[index].lock();
        slot.handle = Some(handle);
        slot.mark_running(now);
    }
    shared.output.set_healthy(index, true);
    let latency = now.duration_since(started);
    info!(
        slot = index,
        generation,
        latency_us = latency.as_micros() as u64,
        "worker ready"
    );
    Ok(latency)
}

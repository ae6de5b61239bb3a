//! Supervisor scenarios with thread workers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tandem_config::{EngineConfig, WorkerMode};
use tandem_core::PatchError;
use tandem_engine::{
    AudioSupervisor, Fault, SlotRole, SlotState, SupervisorContext, SupervisorError,
    SupervisorStatus,
};

const FRAME: usize = 64;

fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.audio.sample_rate = 48000;
    config.audio.frame_len = FRAME;
    config.supervisor.worker_mode = WorkerMode::Thread;
    config.supervisor.runtime_dir = Some(dir.join("run"));
    config.supervisor.heartbeat_timeout_ms = 100;
    config.supervisor.poll_interval_ms = 2;
    config.supervisor.fast_poll_interval_ms = 1;
    config.supervisor.spawn_timeout_ms = 5000;
    config.supervisor.commit_timeout_ms = 5000;
    config
}

fn start(config: EngineConfig) -> AudioSupervisor {
    let ctx = SupervisorContext::init(config).unwrap();
    let supervisor = AudioSupervisor::start(ctx).unwrap();
    assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    supervisor
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

fn settled(status: &SupervisorStatus, slot: usize) -> bool {
    status
        .slot(slot)
        .is_some_and(|s| !s.params.is_empty() && s.params.iter().all(|p| p.current == p.target))
}

#[test]
fn broadcast_reaches_both_slots() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));

    let before: Vec<u64> = supervisor.status().slots.iter().map(|s| s.buffers).collect();
    supervisor.set_param("osc1", "freq", 440.0).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status();
        (0..2).all(|i| {
            let slot = status.slot(i).unwrap();
            slot.buffers >= before[i] + 10 && slot.param("osc1", "freq") == Some((440.0, 440.0))
        })
    }));
    let status = supervisor.status();
    assert_eq!(status.param(0, "osc1", "freq"), Some((440.0, 440.0)));
    assert_eq!(status.param(1, "osc1", "freq"), Some((440.0, 440.0)));
    assert_eq!(status.metrics.commands_broadcast, 1);
}

#[test]
fn slots_stay_in_lockstep() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));

    for (i, freq) in [110.0, 220.0, 330.0, 550.0].into_iter().enumerate() {
        supervisor.set_param("osc1", "freq", freq).unwrap();
        supervisor
            .set_param("filt1", "cutoff", 400.0 + 100.0 * i as f64)
            .unwrap();
    }
    supervisor.set_param("env1", "attack", 12.0).unwrap();
    supervisor.set_param("osc1", "shape", 2.0).unwrap();
    supervisor.gate("env1", true).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status();
        settled(&status, 0)
            && settled(&status, 1)
            && status.param(0, "filt1", "cutoff") == Some((700.0, 700.0))
            && status.param(1, "filt1", "cutoff") == Some((700.0, 700.0))
    }));
    let a = supervisor.slot_params(0).unwrap();
    let b = supervisor.slot_params(1).unwrap();
    assert_eq!(a, b);
}

#[test]
fn killing_active_fails_over_without_silence() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.rings.underrun_hold = 32;
    let supervisor = start(config);
    supervisor.set_param("osc1", "freq", 440.0).unwrap();

    let mut boundary = supervisor.boundary(1);
    let running = Arc::new(AtomicBool::new(true));
    let reader = {
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            let period = Duration::from_secs_f64(FRAME as f64 / 48000.0);
            let mut buf = vec![0.0f32; FRAME];
            while running.load(Ordering::Relaxed) {
                boundary.fill(&mut buf);
                std::thread::sleep(period);
            }
            boundary.stats()
        })
    };
    std::thread::sleep(Duration::from_millis(30));

    let killed = supervisor.active_slot();
    let t = Instant::now();
    supervisor.inject_fault(killed, Fault::Kill).unwrap();
    assert!(wait_until(Duration::from_secs(2), || supervisor.active_slot() != killed));
    let flip = t.elapsed();
    assert!(flip < Duration::from_millis(500), "failover took {flip:?}");

    std::thread::sleep(Duration::from_millis(30));
    running.store(false, Ordering::Relaxed);
    let stats = reader.join().unwrap();
    assert!(stats.silent_frames <= 1, "silent frames: {}", stats.silent_frames);

    let metrics = supervisor.status().metrics;
    assert_eq!(metrics.crashes, 1);
    assert_eq!(metrics.failovers, 1);
    assert_eq!(metrics.switch.count, 1);

    // The replacement is seeded with the mirrored state.
    assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    let status = supervisor.status();
    assert!(status.metrics.replacements >= 1);
    let replaced = status.slot(killed).unwrap();
    assert_eq!(replaced.role, SlotRole::Standby);
    assert_eq!(replaced.incarnation, 2);
    assert_eq!(replaced.param("osc1", "freq"), Some((440.0, 440.0)));
}

#[test]
fn standby_failure_keeps_active() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));
    let active = supervisor.active_slot();
    let standby = 1 - active;

    supervisor.inject_fault(standby, Fault::Crash).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        supervisor.status().metrics.crashes == 1
    }));
    assert_eq!(supervisor.active_slot(), active);
    assert!(supervisor.wait_healthy(Duration::from_secs(5)));

    let status = supervisor.status();
    assert_eq!(status.metrics.failovers, 0);
    assert_eq!(status.slot(standby).unwrap().state, SlotState::Running);
    assert_eq!(status.slot(standby).unwrap().incarnation, 2);
}

#[test]
fn hung_active_is_detected_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));
    let hung = supervisor.active_slot();

    supervisor.inject_fault(hung, Fault::Hang).unwrap();
    assert!(wait_until(Duration::from_secs(2), || supervisor.active_slot() != hung));

    let metrics = supervisor.status().metrics;
    assert_eq!(metrics.hangs, 1);
    assert_eq!(metrics.failovers, 1);
    assert!(metrics.detection.max_us >= 100_000);

    assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    assert_eq!(supervisor.status().slot(hung).unwrap().incarnation, 2);
}

#[test]
fn exactly_one_slot_is_active_through_failures() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(start(config(dir.path())));
    let running = Arc::new(AtomicBool::new(true));
    let sampler = {
        let supervisor = Arc::clone(&supervisor);
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            let mut samples = 0;
            while running.load(Ordering::Relaxed) {
                let status = supervisor.status();
                let actives: Vec<usize> = status
                    .slots
                    .iter()
                    .filter(|s| s.role == SlotRole::Active)
                    .map(|s| s.index)
                    .collect();
                assert_eq!(actives, [status.active_slot]);
                samples += 1;
            }
            samples
        })
    };

    for _ in 0..3 {
        let active = supervisor.active_slot();
        supervisor.inject_fault(active, Fault::Kill).unwrap();
        assert!(wait_until(Duration::from_secs(2), || supervisor.active_slot() != active));
        assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    }
    running.store(false, Ordering::Relaxed);
    assert!(sampler.join().unwrap() > 0);
    assert_eq!(supervisor.status().metrics.failovers, 3);
}

#[test]
fn commit_swaps_to_new_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.supervisor.resync_after_commit = false;
    let supervisor = start(config);
    // Recorded in the mirror, so the new graph starts gated.
    supervisor.gate("env", true).unwrap();

    let mut builder = supervisor.begin_empty_patch();
    builder.add_module("gen", "osc").unwrap();
    builder.add_module("env", "env").unwrap();
    builder.add_module("filt", "filter").unwrap();
    builder.connect("gen", "env").unwrap();
    builder.connect("env", "filt").unwrap();

    let before = supervisor.active_slot();
    let report = supervisor.commit_patch(builder).unwrap();
    assert_eq!(report.previous, before);
    assert_eq!(report.active, 1 - before);
    assert_eq!(report.generation, 2);
    assert_eq!(supervisor.active_slot(), report.active);

    let mut frame = vec![0.0f32; FRAME];
    let mut boundary = supervisor.boundary(1);
    boundary.fill(&mut frame);
    assert!(frame.iter().any(|s| s.abs() > 1e-6), "new graph is silent");

    let status = supervisor.status();
    assert_eq!(status.patch_generation, 2);
    let old = status.slot(report.previous).unwrap();
    assert_eq!(old.state, SlotState::Running);
    assert_eq!(old.patch_generation, 1);
    assert_eq!(status.slot(report.active).unwrap().patch_generation, 2);
    assert_eq!(status.metrics.commits, 1);
}

#[test]
fn commit_then_resync_moves_both_slots() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));

    let mut builder = supervisor.begin_patch().unwrap();
    builder.add_module("out", "gain").unwrap();
    builder.connect("filt1", "out").unwrap();
    let report = supervisor.commit_patch(builder).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().slot(report.previous).unwrap().patch_generation == 2
    }));
    assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    supervisor.set_param("out", "level", 0.5).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status();
        status.param(0, "out", "level") == Some((0.5, 0.5))
            && status.param(1, "out", "level") == Some((0.5, 0.5))
    }));
}

#[test]
fn commit_drops_mirrored_state_of_departed_modules() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));
    supervisor.set_param("osc1", "freq", 440.0).unwrap();
    supervisor.gate("env", true).unwrap();

    let mut builder = supervisor.begin_empty_patch();
    builder.add_module("gen", "osc").unwrap();
    builder.add_module("env", "env").unwrap();
    builder.connect("gen", "env").unwrap();
    let report = supervisor.commit_patch(builder).unwrap();

    // The resynced slot is seeded after the commit: nothing for osc1.
    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status();
        let slot = status.slot(report.previous).unwrap();
        slot.patch_generation == 2 && slot.state == SlotState::Running && slot.buffers > 0
    }));
    let status = supervisor.status();
    let resynced = status.slot(report.previous).unwrap();
    assert_eq!(resynced.dropped, 0);
    assert!(resynced.param("gen", "freq").is_some());
}

#[test]
fn losing_both_slots_reports_no_viable_worker() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    // Keep failed slots down for the whole test.
    config.supervisor.rebuild_delay_ms = 60_000;
    let supervisor = start(config);
    let active = supervisor.active_slot();
    let standby = 1 - active;

    supervisor.inject_fault(standby, Fault::Kill).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        supervisor.status().slot(standby).unwrap().state == SlotState::Dead
    }));
    supervisor.inject_fault(active, Fault::Kill).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        let status = supervisor.status();
        !status.viable && status.slot(active).unwrap().state == SlotState::Dead
    }));
    assert_eq!(supervisor.active_slot(), active);

    assert!(matches!(
        supervisor.set_param("osc1", "freq", 330.0),
        Err(SupervisorError::NoViableWorker)
    ));
    let builder = supervisor.begin_patch().unwrap();
    assert!(matches!(
        supervisor.commit_patch(builder),
        Err(SupervisorError::NoViableWorker)
    ));

    // The callback keeps running on silence.
    let mut boundary = supervisor.boundary(1);
    let mut frame = vec![1.0f32; FRAME];
    for _ in 0..16 {
        boundary.fill(&mut frame);
    }
    assert!(frame.iter().all(|&s| s == 0.0));
    assert!(boundary.stats().silent_frames >= 10);
    assert!(supervisor.status().slot(active).unwrap().underruns >= 10);

    let metrics = supervisor.status().metrics;
    assert_eq!(metrics.crashes, 2);
    assert_eq!(metrics.failovers, 0);
    assert_eq!(metrics.replacements, 0);
}

#[test]
fn cyclic_connect_rejected_in_build_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.supervisor.resync_after_commit = false;
    let supervisor = start(config);

    let mut builder = supervisor.begin_empty_patch();
    builder.add_module("gen", "osc").unwrap();
    builder.add_module("filt", "filter").unwrap();
    builder.connect("gen", "filt").unwrap();
    assert!(matches!(
        builder.connect("filt", "gen"),
        Err(PatchError::CycleDetected { .. })
    ));
    assert_eq!(builder.validate().unwrap(), 2);
    assert_eq!(builder.spec().connections.len(), 1);

    let report = supervisor.commit_patch(builder).unwrap();
    assert_eq!(report.generation, 2);
}

#[test]
fn invalid_patch_leaves_slots_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));
    let before = supervisor.status();

    let mut builder = supervisor.begin_empty_patch();
    builder.add_module("filt", "filter").unwrap();
    assert!(matches!(
        supervisor.commit_patch(builder),
        Err(SupervisorError::Patch(PatchError::MissingInput(_)))
    ));

    let after = supervisor.status();
    assert_eq!(after.active_slot, before.active_slot);
    assert_eq!(after.patch_generation, 1);
    for i in 0..2 {
        assert_eq!(after.slot(i).unwrap().incarnation, before.slot(i).unwrap().incarnation);
    }
}

#[test]
fn desynced_standby_is_resynced_from_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.rings.command_slots = 8;
    config.supervisor.command_write_timeout_ms = 20;
    config.supervisor.heartbeat_timeout_ms = 2000;
    let supervisor = start(config);
    let standby = 1 - supervisor.active_slot();

    // A hung standby stops draining its ring.
    supervisor.inject_fault(standby, Fault::Hang).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    for i in 0..16 {
        supervisor
            .set_param("filt1", "cutoff", 100.0 * f64::from(i + 1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(supervisor.status().metrics.standby_desyncs >= 1);

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().slot(standby).unwrap().incarnation >= 2
    }));
    assert!(supervisor.wait_healthy(Duration::from_secs(5)));
    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status();
        status.param(0, "filt1", "cutoff") == Some((1600.0, 1600.0))
            && status.param(1, "filt1", "cutoff") == Some((1600.0, 1600.0))
    }));
    assert_eq!(supervisor.status().metrics.hangs, 0);
}

#[test]
fn invalid_commands_never_reach_rings() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = start(config(dir.path()));
    assert!(matches!(
        supervisor.set_param("oscillator-number-one", "freq", 1.0),
        Err(SupervisorError::Command(_))
    ));
    assert!(matches!(
        supervisor.set_param("osc1", "freq", f64::NAN),
        Err(SupervisorError::Command(_))
    ));
    assert_eq!(supervisor.status().metrics.commands_broadcast, 0);
    assert!(matches!(
        supervisor.inject_fault(2, Fault::Kill),
        Err(SupervisorError::InvalidSlot(2))
    ));
}

#[test]
fn shutdown_rejects_further_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut supervisor = start(config(dir.path()));
    let run = dir.path().join("run");
    supervisor.shutdown();
    assert!(matches!(
        supervisor.set_param("osc1", "freq", 220.0),
        Err(SupervisorError::ShuttingDown)
    ));
    let status = supervisor.status();
    assert!(!status.viable);
    assert!(status.slots.iter().all(|s| s.state == SlotState::Stopped));
    assert!(supervisor.context().registry().entries().unwrap().is_empty());
    drop(supervisor);
    let leftover = std::fs::read_dir(&run)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "shm"))
        .count();
    assert_eq!(leftover, 0);
}

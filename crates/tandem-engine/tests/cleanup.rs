//! Repeated start/shutdown cycles must not leak segments, registry
//! entries or file descriptors.
//!
//! Kept in its own test binary so the descriptor count is not disturbed by
//! other tests running in parallel.

use std::path::Path;
use std::time::Duration;

use tandem_config::{EngineConfig, WorkerMode};
use tandem_engine::{AudioSupervisor, SupervisorContext};
use tandem_shm::SegmentRegistry;

const CYCLES: usize = 50;

fn config(run: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.audio.frame_len = 64;
    config.supervisor.worker_mode = WorkerMode::Thread;
    config.supervisor.runtime_dir = Some(run.to_path_buf());
    config.supervisor.spawn_timeout_ms = 5000;
    config
}

fn shm_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "shm"))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn open_fds() -> Option<usize> {
    std::fs::read_dir("/proc/self/fd").ok().map(Iterator::count)
}

#[cfg(not(target_os = "linux"))]
fn open_fds() -> Option<usize> {
    None
}

#[test]
fn fifty_cycles_leave_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");

    // Warm-up cycle so lazily opened descriptors are counted in the baseline.
    {
        let ctx = SupervisorContext::init(config(&run)).unwrap();
        let mut supervisor = AudioSupervisor::start(ctx).unwrap();
        supervisor.shutdown();
    }
    let baseline = open_fds();

    for cycle in 0..CYCLES {
        let ctx = SupervisorContext::init(config(&run)).unwrap();
        let mut supervisor = AudioSupervisor::start(ctx).unwrap();
        assert!(
            supervisor.wait_healthy(Duration::from_secs(5)),
            "cycle {cycle} never became healthy"
        );
        {
            let mut boundary = supervisor.boundary(2);
            let mut buf = [0.0f32; 128];
            boundary.fill(&mut buf);
        }
        supervisor.set_param("osc1", "freq", 200.0 + cycle as f64).unwrap();
        supervisor.shutdown();
        drop(supervisor);

        assert_eq!(shm_files(&run), 0, "segments left after cycle {cycle}");
    }

    let registry = SegmentRegistry::new(&run);
    assert!(registry.entries().unwrap().is_empty());
    assert_eq!(shm_files(&run), 0);

    if let (Some(before), Some(after)) = (baseline, open_fds()) {
        assert!(
            after <= before + 4,
            "descriptor leak: {before} before, {after} after {CYCLES} cycles"
        );
    }
}

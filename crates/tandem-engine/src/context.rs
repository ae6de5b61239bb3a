//! Process-wide supervisor state: configuration, runtime directory,
//! segment registry and launcher.
//!
//! A [`SupervisorContext`] is created once, explicitly, and passed into
//! [`AudioSupervisor::start`](crate::AudioSupervisor::start). Nothing here is
//! a global; two contexts with different runtime directories can coexist in
//! one process (the tests rely on that).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tandem_config::{ConfigError, EngineConfig, WorkerMode, ensure_dir};
use tandem_shm::{SegmentLayout, SegmentRegistry};
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError, WorkerError};
use crate::launcher::{Launcher, ProcessLauncher, ThreadLauncher};

static SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Everything a supervisor needs besides its workers.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    config: EngineConfig,
    runtime_dir: PathBuf,
    registry: SegmentRegistry,
    launcher: Arc<dyn Launcher>,
    session: String,
}

impl SupervisorContext {
    /// Validates `config`, prepares the runtime directory, reclaims segments
    /// left by dead supervisors and picks a launcher from
    /// `supervisor.worker_mode`.
    ///
    /// Process mode runs `supervisor.worker_exe`, or the current executable
    /// when unset.
    pub fn init(config: EngineConfig) -> Result<Self> {
        let launcher: Arc<dyn Launcher> = match config.supervisor.worker_mode {
            WorkerMode::Thread => Arc::new(ThreadLauncher::new()),
            WorkerMode::Process => {
                let exe = match &config.supervisor.worker_exe {
                    Some(exe) => exe.clone(),
                    None => std::env::current_exe().map_err(|source| WorkerError::Spawn {
                        exe: PathBuf::from("<current exe>"),
                        source,
                    })?,
                };
                Arc::new(ProcessLauncher::new(exe))
            }
        };
        Self::with_launcher(config, launcher)
    }

    /// Like [`init`](Self::init) with an explicit launcher.
    pub fn with_launcher(config: EngineConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
        config.validate().map_err(ConfigError::from)?;

        let runtime_dir = config.supervisor.runtime_dir();
        ensure_dir(&runtime_dir).map_err(|source| SupervisorError::RuntimeDir {
            path: runtime_dir.clone(),
            source,
        })?;

        let registry = SegmentRegistry::new(&runtime_dir);
        let reclaimed = registry.reclaim_orphans()?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed orphaned segments");
        }

        let n = SESSIONS.fetch_add(1, Ordering::Relaxed);
        let session = format!("tandem-{}-{n}", std::process::id());
        debug!(
            session = %session,
            dir = %runtime_dir.display(),
            mode = ?launcher.mode(),
            "supervisor context ready"
        );

        Ok(Self {
            config,
            runtime_dir,
            registry,
            launcher,
            session,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Directory holding segments and the registry.
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// The segment registry.
    pub fn registry(&self) -> &SegmentRegistry {
        &self.registry
    }

    /// The worker launcher.
    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    /// Unique name of this supervisor session.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Registry name of a slot's segment.
    pub fn segment_name(&self, slot: usize) -> String {
        format!("{}-slot{slot}", self.session)
    }

    /// Backing file of a slot's segment.
    pub fn segment_path(&self, slot: usize) -> PathBuf {
        self.runtime_dir
            .join(format!("{}.shm", self.segment_name(slot)))
    }

    /// Ring geometry for every slot segment.
    pub fn layout(&self) -> Result<SegmentLayout> {
        let rings = &self.config.rings;
        Ok(SegmentLayout::new(
            rings.audio_slots,
            self.config.audio.frame_len,
            rings.command_slots,
            rings.param_slots,
        )?)
    }

    /// Drops this session's registry entries.
    ///
    /// The segment files themselves are unlinked when their owning
    /// [`SlotSegment`](tandem_shm::SlotSegment) is dropped.
    pub fn teardown(&self) {
        for slot in 0..2 {
            let name = self.segment_name(slot);
            if let Err(e) = self.registry.unregister(&name) {
                warn!(segment = %name, error = %e, "could not unregister segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tandem_shm::SlotSegment;

    use super::*;

    fn config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.supervisor.runtime_dir = Some(dir.join("run"));
        config.supervisor.worker_mode = WorkerMode::Thread;
        config
    }

    #[test]
    fn init_creates_runtime_dir_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SupervisorContext::init(config(dir.path())).unwrap();
        assert!(ctx.runtime_dir().is_dir());
        assert_eq!(ctx.launcher().mode(), WorkerMode::Thread);
        assert!(ctx.segment_name(1).ends_with("-slot1"));
        assert_eq!(
            ctx.segment_path(0).parent().unwrap(),
            ctx.runtime_dir()
        );
        assert_eq!(ctx.layout().unwrap().frame_len, 256);
    }

    #[test]
    fn sessions_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = SupervisorContext::init(config(dir.path())).unwrap();
        let b = SupervisorContext::init(config(dir.path())).unwrap();
        assert_ne!(a.session(), b.session());
        assert_ne!(a.segment_path(0), b.segment_path(0));
    }

    #[test]
    fn invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.audio.frame_len = 0;
        assert!(matches!(
            SupervisorContext::init(config),
            Err(SupervisorError::Config(_))
        ));
    }

    #[test]
    fn init_reclaims_dead_owners() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        std::fs::create_dir_all(&run).unwrap();
        let stale = run.join("stale.shm");
        let layout = SegmentLayout::new(4, 64, 64, 64).unwrap();
        let segment = SlotSegment::create(&stale, layout).unwrap();
        // Keep the file past the handle's lifetime.
        std::mem::forget(segment);
        SegmentRegistry::new(&run)
            .register("stale", &stale, u32::MAX - 1)
            .unwrap();

        let ctx = SupervisorContext::init(config(dir.path())).unwrap();
        assert!(!stale.exists());
        assert!(ctx.registry().entries().unwrap().is_empty());
    }

    #[test]
    fn teardown_unregisters_session_segments() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SupervisorContext::init(config(dir.path())).unwrap();
        for slot in 0..2 {
            ctx.registry()
                .register(&ctx.segment_name(slot), &ctx.segment_path(slot), std::process::id())
                .unwrap();
        }
        assert_eq!(ctx.registry().entries().unwrap().len(), 2);
        ctx.teardown();
        assert!(ctx.registry().entries().unwrap().is_empty());
    }
}

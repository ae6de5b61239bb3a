//! Starting workers: as child processes or as in-process threads.
//!
//! The supervisor only sees [`Launcher`] and [`WorkerHandle`], so the
//! failover logic is identical in both modes. Process mode is what runs in
//! production (a crashed worker cannot take the supervisor down); thread
//! mode is for tests and for platforms without cheap process spawning.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tandem_config::WorkerMode;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::worker::{self, WorkerExit, WorkerSpec};

/// A running worker, from the supervisor's side.
pub trait WorkerHandle: Send {
    /// OS process id (the supervisor's own id for thread workers).
    fn pid(&self) -> u32;

    /// How the worker ended, if it has.
    fn try_exit(&mut self) -> Option<WorkerExit>;

    /// Terminates the worker without waiting for it to cooperate.
    fn kill(&mut self);

    /// Waits up to `timeout` for the worker to end.
    fn wait(&mut self, timeout: Duration) -> Option<WorkerExit> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.try_exit() {
                return Some(exit);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Starts workers for the supervisor.
pub trait Launcher: Send + Sync + std::fmt::Debug {
    /// Launches one worker. Returns once it is started, not once it is ready.
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>, WorkerError>;

    /// Which mode this launcher implements.
    fn mode(&self) -> WorkerMode;
}

/// Launches `<exe> worker --spec <json>` child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    /// Uses `exe` as the worker binary. It must accept the `worker`
    /// subcommand.
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// The worker binary.
    pub fn exe(&self) -> &std::path::Path {
        &self.exe
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        let json = spec.to_json()?;
        let child = Command::new(&self.exe)
            .arg("worker")
            .arg("--spec")
            .arg(json)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                exe: self.exe.clone(),
                source,
            })?;
        debug!(slot = spec.slot, pid = child.id(), "worker process spawned");
        Ok(Box::new(ProcessHandle {
            child,
            killed: false,
            exit: None,
        }))
    }

    fn mode(&self) -> WorkerMode {
        WorkerMode::Process
    }
}

struct ProcessHandle {
    child: Child,
    killed: bool,
    exit: Option<WorkerExit>,
}

impl ProcessHandle {
    fn classify(&self, status: std::process::ExitStatus) -> WorkerExit {
        if self.killed {
            return WorkerExit::Killed;
        }
        match status.code() {
            Some(0) => WorkerExit::Clean,
            Some(3) => WorkerExit::Orphaned,
            Some(code) => WorkerExit::Failed(format!("exit code {code}")),
            None => WorkerExit::Failed(signal_description(status)),
        }
    }
}

#[cfg(unix)]
fn signal_description(status: std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("terminated by signal {sig}"),
        None => "terminated abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_description(_status: std::process::ExitStatus) -> String {
    "terminated abnormally".to_string()
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_exit(&mut self) -> Option<WorkerExit> {
        if self.exit.is_some() {
            return self.exit.clone();
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = self.classify(status);
                self.exit = Some(exit.clone());
                Some(exit)
            }
            Ok(None) => None,
            Err(e) => {
                let exit = WorkerExit::Failed(format!("wait failed: {e}"));
                self.exit = Some(exit.clone());
                Some(exit)
            }
        }
    }

    fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        self.killed = true;
        if let Err(e) = self.child.kill() {
            debug!(pid = self.child.id(), error = %e, "kill failed (already exited?)");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.is_none() {
            self.kill();
            // Reap so no zombie outlives the handle.
            let _ = self.child.wait();
        }
    }
}

/// Runs workers on threads inside the supervisor process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLauncher;

impl ThreadLauncher {
    /// Creates a thread launcher.
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        let abort = Arc::new(AtomicBool::new(false));
        let spec = spec.clone();
        let thread_abort = Arc::clone(&abort);
        let join = std::thread::Builder::new()
            .name(format!("tandem-worker-{}", spec.slot))
            .spawn(move || match worker::run(&spec, &thread_abort) {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(slot = spec.slot, error = %e, "worker thread failed");
                    WorkerExit::Failed(e.to_string())
                }
            })
            .map_err(WorkerError::Thread)?;
        Ok(Box::new(ThreadHandle {
            join: Some(join),
            abort,
            exit: None,
        }))
    }

    fn mode(&self) -> WorkerMode {
        WorkerMode::Thread
    }
}

struct ThreadHandle {
    join: Option<JoinHandle<WorkerExit>>,
    abort: Arc<AtomicBool>,
    exit: Option<WorkerExit>,
}

impl WorkerHandle for ThreadHandle {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn try_exit(&mut self) -> Option<WorkerExit> {
        if self.exit.is_some() {
            return self.exit.clone();
        }
        if !self.join.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        let exit = match self.join.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => WorkerExit::Failed("worker thread panicked".to_string()),
            None => WorkerExit::Killed,
        };
        self.exit = Some(exit.clone());
        Some(exit)
    }

    fn kill(&mut self) {
        self.abort.store(true, Ordering::Release);
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.abort.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

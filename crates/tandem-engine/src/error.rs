//! Error types for workers and the supervisor.

use std::path::PathBuf;

use tandem_config::ConfigError;
use tandem_core::{CommandError, HostError, PatchError};
use tandem_shm::ShmError;
use thiserror::Error;

/// Errors raised while launching or running a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The slot segment could not be mapped or is malformed.
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// The patch could not be built into a host.
    #[error("patch: {0}")]
    Host(#[from] HostError),

    /// A seed command failed validation.
    #[error("seed command: {0}")]
    Seed(#[from] CommandError),

    /// The segment was created for a different frame length.
    #[error("segment frame length {segment} does not match worker frame length {worker}")]
    FrameMismatch {
        /// Frame length in the segment header.
        segment: usize,
        /// Frame length in the worker spec.
        worker: usize,
    },

    /// The worker process could not be started.
    #[error("failed to spawn worker '{exe}': {source}")]
    Spawn {
        /// Executable that was launched.
        exe: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Thread(#[source] std::io::Error),

    /// The worker spec could not be (de)serialised.
    #[error("worker spec: {0}")]
    Spec(#[from] serde_json::Error),

    /// A fault injected by the supervisor asked the worker to crash.
    #[error("injected crash")]
    InjectedCrash,
}

/// Errors surfaced by the supervisor API.
///
/// Recoverable conditions (underruns, malformed commands, single worker
/// failures) are absorbed where they occur and never show up here.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Both slots are down; no worker can produce audio.
    #[error("no viable worker: both slots are down")]
    NoViableWorker,

    /// A patch failed to build or validate.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// A command failed validation before reaching any ring.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A worker did not report ready in time.
    #[error("slot {slot} did not become ready within {timeout_ms} ms")]
    StartupTimeout {
        /// Slot index.
        slot: usize,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A worker exited before it became ready.
    #[error("slot {slot} worker exited during startup: {reason}")]
    WorkerExited {
        /// Slot index.
        slot: usize,
        /// Exit description.
        reason: String,
    },

    /// Slot index out of range.
    #[error("slot {0} does not exist")]
    InvalidSlot(usize),

    /// The supervisor is stopping and accepts no more work.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// Worker launch failed.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Segment or registry failure.
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Runtime directory setup failed.
    #[error("runtime directory '{path}': {source}")]
    RuntimeDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The supervisor's own threads could not be started.
    #[error("failed to start supervisor thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

//! Tandem Engine - dual-slot supervision with instant failover
//!
//! Two workers render the same patch in lockstep. The active one feeds the
//! audio callback; the standby receives every command too, so when the
//! active worker dies or hangs the output is repointed at the standby
//! without rebuilding anything. The failed slot is rebuilt in the
//! background and seeded with the current parameter state.
//!
//! # Core Abstractions
//!
//! ## Supervision
//!
//! - [`SupervisorContext`] - Validated config, runtime directory, segment registry, launcher
//! - [`AudioSupervisor`] - Owns both slots, broadcasts commands, commits patches
//! - [`PollPolicy`] - Adaptive monitor interval
//! - [`SupervisorMetrics`] / [`SupervisorStatus`] - Counters, latency histograms, snapshots
//!
//! ## Workers
//!
//! - [`Launcher`] - [`ProcessLauncher`] (production) or [`ThreadLauncher`] (tests)
//! - [`WorkerSpec`] / [`worker::run`] - The worker side of a slot
//! - [`Fault`] - Operator- and test-driven failure injection
//!
//! ## Audio and Patches
//!
//! - [`AudioBoundary`] - Lock-free, allocation-free reader for the audio callback
//! - [`PatchBuilder`] - Graph build session, committed with [`AudioSupervisor::commit_patch`]
//!
//! # Example
//!
//! ```rust,no_run
//! use tandem_config::{EngineConfig, WorkerMode};
//! use tandem_engine::{AudioSupervisor, SupervisorContext};
//!
//! let mut config = EngineConfig::default();
//! config.supervisor.worker_mode = WorkerMode::Thread;
//! let supervisor = AudioSupervisor::start(SupervisorContext::init(config)?)?;
//!
//! let mut boundary = supervisor.boundary(2);
//! supervisor.set_param("osc1", "freq", 440.0)?;
//! supervisor.gate("env1", true)?;
//!
//! let mut device_buffer = [0.0f32; 512];
//! boundary.fill(&mut device_buffer);
//! # Ok::<(), tandem_engine::SupervisorError>(())
//! ```

mod boundary;
mod context;
mod error;
mod launcher;
mod metrics;
mod mirror;
mod monitor;
mod patch;
mod poll;
mod slot;
mod status;
mod supervisor;
pub mod worker;

pub use boundary::{AudioBoundary, BoundaryStats, SharedOutput};
pub use context::SupervisorContext;
pub use error::{Result, SupervisorError, WorkerError};
pub use launcher::{Launcher, ProcessLauncher, ThreadLauncher, WorkerHandle};
pub use metrics::{LatencyHistogram, LatencySummary, MetricsSnapshot, SupervisorMetrics};
pub use mirror::ParamMirror;
pub use patch::PatchBuilder;
pub use poll::PollPolicy;
pub use slot::SlotState;
pub use status::{ParamStatus, SlotRole, SlotStatus, SupervisorStatus};
pub use supervisor::{AudioSupervisor, CommitReport};
pub use worker::{Fault, SeedCommand, SeedKind, WorkerExit, WorkerSpec};

//! Read-only snapshots of supervisor state.

use serde::Serialize;

use crate::boundary::BoundaryStats;
use crate::metrics::MetricsSnapshot;
use crate::slot::SlotState;

/// Role of a slot at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotRole {
    /// Feeding the audio boundary.
    Active,
    /// Running in lockstep, ready to take over.
    Standby,
}

/// One published parameter of a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamStatus {
    /// Module id.
    pub module: String,
    /// Parameter id.
    pub param: String,
    /// Smoothed value.
    pub current: f32,
    /// Smoothing target.
    pub target: f32,
}

/// Snapshot of one worker slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStatus {
    /// Slot index.
    pub index: usize,
    /// Active or standby.
    pub role: SlotRole,
    /// Lifecycle state.
    pub state: SlotState,
    /// Worker pid, if running.
    pub pid: Option<u32>,
    /// How many workers this slot has started.
    pub incarnation: u64,
    /// Heartbeat counter of the current worker.
    pub heartbeat: u64,
    /// Patch generation the worker runs.
    pub patch_generation: u64,
    /// True once the worker has published its first frame.
    pub ready: bool,
    /// Frames rendered.
    pub buffers: u64,
    /// Commands applied.
    pub commands: u64,
    /// Records that failed to decode.
    pub rejected: u64,
    /// Commands for unknown modules or parameters.
    pub dropped: u64,
    /// Underruns at the boundary while reading this slot.
    pub underruns: u64,
    /// Frames repeated under the keep policy.
    pub repeats: u64,
    /// Frames published into the slot's ring, across incarnations.
    pub frames_written: u64,
    /// Published parameters.
    pub params: Vec<ParamStatus>,
}

impl SlotStatus {
    /// Published `(current, target)` of a parameter.
    pub fn param(&self, module: &str, param: &str) -> Option<(f32, f32)> {
        self.params
            .iter()
            .find(|p| p.module == module && p.param == param)
            .map(|p| (p.current, p.target))
    }
}

/// Snapshot of the whole supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorStatus {
    /// Slot feeding the boundary.
    pub active_slot: usize,
    /// True if at least one slot can produce audio.
    pub viable: bool,
    /// Generation of the live patch.
    pub patch_generation: u64,
    /// Time since start.
    pub uptime_ms: u64,
    /// Current monitor poll interval.
    pub poll_interval_us: u64,
    /// Per-slot state.
    pub slots: Vec<SlotStatus>,
    /// Counters and latencies.
    pub metrics: MetricsSnapshot,
    /// Boundary counters.
    pub boundary: BoundaryStats,
}

impl SupervisorStatus {
    /// Status of slot `index`.
    pub fn slot(&self, index: usize) -> Option<&SlotStatus> {
        self.slots.get(index)
    }

    /// Published `(current, target)` of a parameter on slot `slot`.
    pub fn param(&self, slot: usize, module: &str, param: &str) -> Option<(f32, f32)> {
        self.slot(slot)?.param(module, param)
    }
}

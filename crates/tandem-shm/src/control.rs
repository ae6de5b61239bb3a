//! Control block: heartbeat, counters and lifecycle flags.
//!
//! The worker writes its line (heartbeat, counters, ready, pid); the
//! supervisor writes its own (shutdown, fault injection). Each side only
//! reads the other's line, so there are no read-modify-write races across
//! processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::layout::SegmentLayout;
use crate::segment::Segment;

// Worker line.
const HEARTBEAT: usize = 0;
const BUFFERS: usize = 8;
const COMMANDS: usize = 16;
const REJECTED: usize = 24;
const DROPPED: usize = 32;
const READY: usize = 40;
const WORKER_PID: usize = 48;
const PATCH_GEN: usize = 56;

// Supervisor line.
const SHUTDOWN: usize = 0;
const FAULT: usize = 8;

/// Counters a worker publishes after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounters {
    /// Frames rendered.
    pub buffers: u64,
    /// Commands applied.
    pub commands: u64,
    /// Records that failed to decode.
    pub rejected: u64,
    /// Commands for unknown modules or parameters.
    pub dropped: u64,
}

/// View of a segment's control lines.
#[derive(Clone)]
pub struct Control {
    segment: Arc<Segment>,
    worker: usize,
    host: usize,
}

impl Control {
    pub(crate) fn new(segment: Arc<Segment>, layout: &SegmentLayout) -> Self {
        Self {
            segment,
            worker: layout.worker_control(),
            host: layout.host_control(),
        }
    }

    #[inline]
    fn worker_word(&self, field: usize) -> &AtomicU64 {
        self.segment.u64_at(self.worker + field)
    }

    #[inline]
    fn host_word(&self, field: usize) -> &AtomicU64 {
        self.segment.u64_at(self.host + field)
    }

    // --- Worker side ---

    /// Advances the heartbeat by one.
    #[inline]
    pub fn beat(&self) {
        let word = self.worker_word(HEARTBEAT);
        word.store(word.load(Ordering::Relaxed) + 1, Ordering::Release);
    }

    /// Publishes the worker's counters.
    pub fn publish_counters(&self, counters: WorkerCounters) {
        self.worker_word(BUFFERS)
            .store(counters.buffers, Ordering::Relaxed);
        self.worker_word(COMMANDS)
            .store(counters.commands, Ordering::Relaxed);
        self.worker_word(REJECTED)
            .store(counters.rejected, Ordering::Relaxed);
        self.worker_word(DROPPED)
            .store(counters.dropped, Ordering::Relaxed);
    }

    /// Marks the worker as warmed up and producing.
    pub fn set_ready(&self, ready: bool) {
        self.worker_word(READY)
            .store(u64::from(ready), Ordering::Release);
    }

    /// Records the worker's OS process id.
    pub fn set_worker_pid(&self, pid: u32) {
        self.worker_word(WORKER_PID)
            .store(u64::from(pid), Ordering::Release);
    }

    /// Records which patch generation the worker is running.
    pub fn set_patch_generation(&self, generation: u64) {
        self.worker_word(PATCH_GEN)
            .store(generation, Ordering::Release);
    }

    /// True once the supervisor asked the worker to exit.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.host_word(SHUTDOWN).load(Ordering::Acquire) != 0
    }

    /// Pending injected fault code, 0 if none.
    #[inline]
    pub fn pending_fault(&self) -> u64 {
        self.host_word(FAULT).load(Ordering::Acquire)
    }

    // --- Supervisor side ---

    /// Current heartbeat value.
    pub fn heartbeat(&self) -> u64 {
        self.worker_word(HEARTBEAT).load(Ordering::Acquire)
    }

    /// Last published counters.
    pub fn counters(&self) -> WorkerCounters {
        WorkerCounters {
            buffers: self.worker_word(BUFFERS).load(Ordering::Relaxed),
            commands: self.worker_word(COMMANDS).load(Ordering::Relaxed),
            rejected: self.worker_word(REJECTED).load(Ordering::Relaxed),
            dropped: self.worker_word(DROPPED).load(Ordering::Relaxed),
        }
    }

    /// True once the worker finished warm-up.
    pub fn is_ready(&self) -> bool {
        self.worker_word(READY).load(Ordering::Acquire) != 0
    }

    /// Worker process id, 0 until published.
    pub fn worker_pid(&self) -> u32 {
        self.worker_word(WORKER_PID).load(Ordering::Acquire) as u32
    }

    /// Patch generation the worker is running.
    pub fn patch_generation(&self) -> u64 {
        self.worker_word(PATCH_GEN).load(Ordering::Acquire)
    }

    /// Asks the worker to exit after its current tick.
    pub fn request_shutdown(&self) {
        self.host_word(SHUTDOWN).store(1, Ordering::Release);
    }

    /// Asks the worker to fail in the way `code` describes.
    pub fn inject_fault(&self, code: u64) {
        self.host_word(FAULT).store(code, Ordering::Release);
    }

    /// Clears both lines. Neither side may be active.
    pub fn reset(&self) {
        for field in [
            HEARTBEAT, BUFFERS, COMMANDS, REJECTED, DROPPED, READY, WORKER_PID, PATCH_GEN,
        ] {
            self.worker_word(field).store(0, Ordering::Release);
        }
        self.host_word(SHUTDOWN).store(0, Ordering::Release);
        self.host_word(FAULT).store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("heartbeat", &self.heartbeat())
            .field("ready", &self.is_ready())
            .field("pid", &self.worker_pid())
            .finish_non_exhaustive()
    }
}

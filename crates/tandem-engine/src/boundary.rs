//! The audio boundary: where worker frames meet the audio callback.
//!
//! [`SharedOutput`] holds both slots' audio rings and the active-slot index.
//! The monitor and the commit path repoint the index; the callback reads it
//! once per frame. Switching is a single compare-exchange, so failover is
//! lock-free and takes effect on the next frame.
//!
//! [`AudioBoundary`] is the callback-side reader. It never blocks and never
//! allocates: when the active ring has nothing to serve it writes silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tandem_shm::{AudioRing, ReadStatus};

/// Ring pair plus the active-slot pointer.
#[derive(Debug)]
pub struct SharedOutput {
    active: AtomicUsize,
    rings: [AudioRing; 2],
    healthy: [AtomicBool; 2],
    keep: u32,
    silent_frames: AtomicU64,
    frames: AtomicU64,
    repeated_frames: AtomicU64,
}

impl SharedOutput {
    /// Wraps both slots' rings with slot 0 active and both slots unhealthy.
    ///
    /// `keep` is how many times a frame may be repeated on underrun before
    /// silence is emitted.
    pub fn new(rings: [AudioRing; 2], keep: u32) -> Self {
        Self {
            active: AtomicUsize::new(0),
            rings,
            healthy: [AtomicBool::new(false), AtomicBool::new(false)],
            keep,
            silent_frames: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            repeated_frames: AtomicU64::new(0),
        }
    }

    /// Index of the slot the boundary reads from.
    #[inline]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// True if `slot` is marked able to produce audio.
    pub fn is_healthy(&self, slot: usize) -> bool {
        self.healthy[slot].load(Ordering::Acquire)
    }

    /// True if either slot is healthy.
    pub fn any_healthy(&self) -> bool {
        self.is_healthy(0) || self.is_healthy(1)
    }

    pub(crate) fn set_healthy(&self, slot: usize, healthy: bool) {
        self.healthy[slot].store(healthy, Ordering::Release);
    }

    /// Points the boundary at `slot`. Returns the previous slot.
    pub(crate) fn set_active(&self, slot: usize) -> usize {
        self.active.swap(slot, Ordering::AcqRel)
    }

    /// Moves the active pointer from `from` to `to` if it still points at
    /// `from`. Used by the commit path, which already knows `to` is ready.
    pub(crate) fn swap_active(&self, from: usize, to: usize) -> bool {
        self.active
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks `from` failed and, if it was active and the other slot is
    /// healthy, switches to the other slot.
    ///
    /// Returns the slot now active if a switch happened.
    pub(crate) fn fail_over(&self, from: usize) -> Option<usize> {
        self.set_healthy(from, false);
        let other = 1 - from;
        if !self.is_healthy(other) {
            return None;
        }
        self.active
            .compare_exchange(from, other, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| other)
    }

    /// The ring of `slot`.
    pub fn ring(&self, slot: usize) -> &AudioRing {
        &self.rings[slot]
    }

    /// Counters since creation.
    pub fn stats(&self) -> BoundaryStats {
        BoundaryStats {
            frames: self.frames.load(Ordering::Relaxed),
            silent_frames: self.silent_frames.load(Ordering::Relaxed),
            repeated_frames: self.repeated_frames.load(Ordering::Relaxed),
        }
    }

    /// Serves one frame from the active ring into `out`.
    ///
    /// Returns true if `out` holds audio; on false it holds silence.
    pub fn read_frame(&self, out: &mut [f32]) -> bool {
        let ring = &self.rings[self.active()];
        self.frames.fetch_add(1, Ordering::Relaxed);
        match ring.read_latest_keep(out, self.keep) {
            ReadStatus::Fresh(_) => true,
            ReadStatus::Repeated(_) => {
                self.repeated_frames.fetch_add(1, Ordering::Relaxed);
                true
            }
            ReadStatus::Empty => {
                ring.note_underrun();
                self.silent_frames.fetch_add(1, Ordering::Relaxed);
                out.fill(0.0);
                false
            }
        }
    }
}

/// Frame counters at the audio boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoundaryStats {
    /// Frames requested by the callback.
    pub frames: u64,
    /// Frames served as silence.
    pub silent_frames: u64,
    /// Frames served by repeating the previous one.
    pub repeated_frames: u64,
}

/// Callback-side reader: turns frames into an interleaved device buffer of
/// any size.
pub struct AudioBoundary {
    shared: Arc<SharedOutput>,
    frame: Vec<f32>,
    pos: usize,
    channels: usize,
}

impl AudioBoundary {
    /// Creates a reader producing `channels` interleaved channels.
    pub fn new(shared: Arc<SharedOutput>, channels: usize) -> Self {
        let frame_len = shared.ring(0).frame_len();
        Self {
            shared,
            frame: vec![0.0; frame_len],
            // Start exhausted so the first fill pulls a frame.
            pos: frame_len,
            channels: channels.max(1),
        }
    }

    /// Interleaved channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fills `out` with interleaved samples, copying the mono frame to every
    /// channel. Never blocks or allocates.
    pub fn fill(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(self.channels) {
            if self.pos >= self.frame.len() {
                self.shared.read_frame(&mut self.frame);
                self.pos = 0;
            }
            let sample = self.frame.get(self.pos).copied().unwrap_or(0.0);
            chunk.fill(sample);
            self.pos += 1;
        }
    }

    /// Counters of the shared output.
    pub fn stats(&self) -> BoundaryStats {
        self.shared.stats()
    }
}

impl std::fmt::Debug for AudioBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBoundary")
            .field("active", &self.shared.active())
            .field("channels", &self.channels)
            .field("frame_len", &self.frame.len())
            .finish()
    }
}

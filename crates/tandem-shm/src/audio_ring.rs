//! Single-producer, single-consumer ring of audio frames.
//!
//! The worker writes one frame per tick; the audio boundary reads the most
//! recent complete frame. Neither side ever waits for the other:
//!
//! - `write` overwrites the oldest slot and publishes a sequence number.
//! - `read_latest` copies the newest frame and then re-checks the sequence
//!   number. If the writer lapped the ring during the copy, the copy is
//!   discarded and retried a bounded number of times before giving up.
//!
//! Samples are stored as `f32` bit patterns in `AtomicU32` cells, so a torn
//! read is a detectable stale copy, never undefined behaviour.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

use crate::layout::SegmentLayout;
use crate::segment::Segment;

const TORN_READ_RETRIES: usize = 3;

/// Result of a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A frame not served before; carries its sequence number.
    Fresh(u64),
    /// The previous frame served again under a keep policy.
    Repeated(u64),
    /// Nothing to serve. The caller should emit silence.
    Empty,
}

impl ReadStatus {
    /// True if the output buffer was filled with audio.
    pub fn has_audio(self) -> bool {
        !matches!(self, ReadStatus::Empty)
    }
}

/// View of the audio ring inside a slot segment.
#[derive(Clone)]
pub struct AudioRing {
    segment: Arc<Segment>,
    writer: usize,
    reader: usize,
    frames: usize,
    slots: u64,
    frame_len: usize,
}

impl AudioRing {
    pub(crate) fn new(segment: Arc<Segment>, layout: &SegmentLayout) -> Self {
        Self {
            segment,
            writer: layout.audio_writer(),
            reader: layout.audio_reader(),
            frames: layout.audio_frames(),
            slots: layout.audio_slots as u64,
            frame_len: layout.frame_len,
        }
    }

    #[inline]
    fn write_seq(&self) -> &AtomicU64 {
        self.segment.u64_at(self.writer)
    }

    #[inline]
    fn read_seq(&self) -> &AtomicU64 {
        self.segment.u64_at(self.reader)
    }

    #[inline]
    fn underruns_cell(&self) -> &AtomicU64 {
        self.segment.u64_at(self.reader + 8)
    }

    #[inline]
    fn repeats_cell(&self) -> &AtomicU64 {
        self.segment.u64_at(self.reader + 16)
    }

    #[inline]
    fn held_cell(&self) -> &AtomicU64 {
        self.segment.u64_at(self.reader + 24)
    }

    #[inline]
    fn sample(&self, slot: u64, index: usize) -> &AtomicU32 {
        let offset = self.frames + (slot as usize * self.frame_len + index) * 4;
        self.segment.u32_at(offset)
    }

    /// Samples per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of frames the ring holds.
    pub fn capacity(&self) -> usize {
        self.slots as usize
    }

    /// Frames published since the last [`reset`](Self::reset).
    pub fn written(&self) -> u64 {
        self.write_seq().load(Ordering::Acquire)
    }

    // --- Producer ---

    /// Publishes one frame. Never blocks, never allocates.
    ///
    /// Short frames are zero-padded; long frames are truncated.
    pub fn write(&self, frame: &[f32]) {
        let seq = self.write_seq().load(Ordering::Relaxed);
        let slot = seq % self.slots;
        // Pairs with the reader's acquire fence: a reader that sees any of
        // these samples also sees `write_seq >= seq`.
        fence(Ordering::Release);
        for i in 0..self.frame_len {
            let value = frame.get(i).copied().unwrap_or(0.0);
            self.sample(slot, i).store(value.to_bits(), Ordering::Relaxed);
        }
        self.write_seq().store(seq + 1, Ordering::Release);
    }

    // --- Consumer ---

    /// Copies the newest frame into `out` if it has not been served yet.
    ///
    /// Skip-ahead policy: frames older than the newest are never served.
    /// Returns [`ReadStatus::Empty`] (and leaves `out` untouched) when the
    /// producer has nothing new.
    pub fn read_latest(&self, out: &mut [f32]) -> ReadStatus {
        self.read_latest_keep(out, 0)
    }

    /// Like [`read_latest`](Self::read_latest), but when nothing new is
    /// available the last served frame is repeated up to `keep` consecutive
    /// times before reporting [`ReadStatus::Empty`].
    pub fn read_latest_keep(&self, out: &mut [f32], keep: u32) -> ReadStatus {
        let served = self.read_seq().load(Ordering::Relaxed);
        let written = self.write_seq().load(Ordering::Acquire);

        if written > served {
            if let Some(seq) = self.copy_newest(out) {
                self.read_seq().store(seq + 1, Ordering::Relaxed);
                self.held_cell().store(0, Ordering::Relaxed);
                return ReadStatus::Fresh(seq);
            }
            return ReadStatus::Empty;
        }

        if served > 0 && keep > 0 {
            let held = self.held_cell().load(Ordering::Relaxed);
            if held < u64::from(keep) && self.copy_seq(served - 1, out) {
                self.held_cell().store(held + 1, Ordering::Relaxed);
                self.repeats_cell().fetch_add(1, Ordering::Relaxed);
                return ReadStatus::Repeated(served - 1);
            }
        }
        ReadStatus::Empty
    }

    /// Copies the newest published frame, retrying if the writer lapped it.
    fn copy_newest(&self, out: &mut [f32]) -> Option<u64> {
        for _ in 0..TORN_READ_RETRIES {
            let written = self.write_seq().load(Ordering::Acquire);
            if written == 0 {
                return None;
            }
            if self.copy_seq(written - 1, out) {
                return Some(written - 1);
            }
        }
        None
    }

    /// Copies frame `seq`; false if the writer may have overwritten it.
    fn copy_seq(&self, seq: u64, out: &mut [f32]) -> bool {
        let slot = seq % self.slots;
        let n = out.len().min(self.frame_len);
        for (i, sample) in out[..n].iter_mut().enumerate() {
            *sample = f32::from_bits(self.sample(slot, i).load(Ordering::Relaxed));
        }
        out[n..].fill(0.0);
        fence(Ordering::Acquire);
        // The writer touches slot `seq % slots` again only once it starts
        // frame `seq + slots`, which it does after publishing `seq + slots - 1`.
        let after = self.write_seq().load(Ordering::Relaxed);
        after < seq + self.slots
    }

    /// Counts one underrun (called by the consumer on `Empty`).
    #[inline]
    pub fn note_underrun(&self) {
        self.underruns_cell().fetch_add(1, Ordering::Relaxed);
    }

    /// Underruns recorded since the last reset.
    pub fn underruns(&self) -> u64 {
        self.underruns_cell().load(Ordering::Relaxed)
    }

    /// Frames served again under a keep policy.
    pub fn repeats(&self) -> u64 {
        self.repeats_cell().load(Ordering::Relaxed)
    }

    /// Frames written but never served (skipped by the skip-ahead policy or
    /// still pending).
    pub fn skipped(&self) -> u64 {
        let written = self.written();
        let served = self.read_seq().load(Ordering::Relaxed);
        written.saturating_sub(served)
    }

    /// Marks every published frame as served, so the next read only returns
    /// frames written after this call.
    pub fn catch_up(&self) {
        let written = self.write_seq().load(Ordering::Acquire);
        self.read_seq().store(written, Ordering::Relaxed);
        self.held_cell().store(0, Ordering::Relaxed);
    }

    /// Prepares the ring for a new producer while a reader may still be
    /// attached.
    ///
    /// Sequence numbers are kept, so a cursor the reader stores concurrently
    /// can never run ahead of the next producer. Counters start from zero.
    pub fn recycle(&self) {
        self.underruns_cell().store(0, Ordering::Relaxed);
        self.repeats_cell().store(0, Ordering::Relaxed);
        self.held_cell().store(0, Ordering::Relaxed);
    }

    /// Returns the ring to its empty state. Neither side may be active.
    pub fn reset(&self) {
        self.write_seq().store(0, Ordering::Release);
        self.read_seq().store(0, Ordering::Relaxed);
        self.underruns_cell().store(0, Ordering::Relaxed);
        self.repeats_cell().store(0, Ordering::Relaxed);
        self.held_cell().store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AudioRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRing")
            .field("slots", &self.slots)
            .field("frame_len", &self.frame_len)
            .field("written", &self.written())
            .field("underruns", &self.underruns())
            .finish()
    }
}

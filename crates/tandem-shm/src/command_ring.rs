//! Single-producer, single-consumer ring of 64-byte command records.
//!
//! `head` and `tail` are monotonically increasing counters; the slot index
//! is the counter masked by `capacity - 1`. The producer owns `head`, the
//! consumer owns `tail`, and each lives on its own cache line.
//!
//! A full ring pushes back on the producer only: [`CommandRing::write`]
//! waits (spin, then sleep with backoff) up to a timeout, while the worker's
//! [`CommandRing::read`] never waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tandem_core::{COMMAND_SIZE, CommandSource};

use crate::error::{Result, ShmError};
use crate::layout::SegmentLayout;
use crate::segment::Segment;

const WORDS: usize = COMMAND_SIZE / 8;
const SPINS_BEFORE_SLEEP: u32 = 64;
const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// View of the command ring inside a slot segment.
#[derive(Clone)]
pub struct CommandRing {
    segment: Arc<Segment>,
    head: usize,
    tail: usize,
    slots: usize,
    mask: u64,
}

impl CommandRing {
    pub(crate) fn new(segment: Arc<Segment>, layout: &SegmentLayout) -> Self {
        Self {
            segment,
            head: layout.command_head(),
            tail: layout.command_tail(),
            slots: layout.command_slots_offset(),
            mask: layout.command_slots as u64 - 1,
        }
    }

    #[inline]
    fn head(&self) -> &AtomicU64 {
        self.segment.u64_at(self.head)
    }

    #[inline]
    fn tail(&self) -> &AtomicU64 {
        self.segment.u64_at(self.tail)
    }

    #[inline]
    fn word(&self, seq: u64, i: usize) -> &AtomicU64 {
        let slot = (seq & self.mask) as usize;
        self.segment.u64_at(self.slots + slot * COMMAND_SIZE + i * 8)
    }

    /// Fixed capacity in records.
    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Records written but not yet read.
    pub fn pending(&self) -> usize {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    // --- Producer ---

    /// Appends a record if there is room.
    ///
    /// Returns `false` when the ring is full or its cursors are corrupt.
    pub fn try_write(&self, record: &[u8; COMMAND_SIZE]) -> bool {
        let head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        match head.checked_sub(tail) {
            Some(used) if used <= self.mask => {}
            _ => return false,
        }
        for (i, chunk) in record.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.word(head, i)
                .store(u64::from_le_bytes(word), Ordering::Relaxed);
        }
        self.head().store(head + 1, Ordering::Release);
        true
    }

    /// Appends a record, waiting up to `timeout` for room.
    ///
    /// Blocks the calling (control) thread only; the consumer is never
    /// affected. A consumer cursor ahead of the producer fails at once.
    pub fn write(&self, record: &[u8; COMMAND_SIZE], timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut spins = 0u32;
        let mut backoff = Duration::from_micros(50);
        loop {
            if self.try_write(record) {
                return Ok(());
            }
            self.check_cursors()?;
            if start.elapsed() >= timeout {
                return Err(ShmError::RingFull {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            if spins < SPINS_BEFORE_SLEEP {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    /// Fails if the consumer cursor has passed the producer cursor.
    pub fn check_cursors(&self) -> Result<()> {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        if tail > head {
            return Err(ShmError::CursorsCorrupt { head, tail });
        }
        Ok(())
    }

    // --- Consumer ---

    /// Pops the oldest record. Never blocks.
    pub fn read(&self) -> Option<[u8; COMMAND_SIZE]> {
        let tail = self.tail().load(Ordering::Relaxed);
        let head = self.head().load(Ordering::Acquire);
        if tail >= head {
            return None;
        }
        let mut record = [0u8; COMMAND_SIZE];
        for i in 0..WORDS {
            let word = self.word(tail, i).load(Ordering::Relaxed);
            record[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        self.tail().store(tail + 1, Ordering::Release);
        Some(record)
    }

    /// Drops every pending record. Neither side may be active.
    pub fn reset(&self) {
        self.head().store(0, Ordering::Release);
        self.tail().store(0, Ordering::Release);
    }
}

impl CommandSource for CommandRing {
    fn next_record(&mut self) -> Option<[u8; COMMAND_SIZE]> {
        self.read()
    }
}

impl std::fmt::Debug for CommandRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRing")
            .field("capacity", &self.capacity())
            .field("pending", &self.pending())
            .finish()
    }
}

//! Seqlock-published table of a worker's parameter values.
//!
//! After each tick the worker copies every `(module, param, current,
//! target)` tuple into this table. The supervisor reads it to answer state
//! queries and to compare slots, without a round trip through the worker.
//!
//! The sequence word is odd while a publish is in progress; readers retry
//! until they observe the same even value before and after their copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use tandem_core::{IDENT_LEN, Ident};

use crate::layout::{PARAM_ENTRY_SIZE, SegmentLayout};
use crate::segment::Segment;

const SNAPSHOT_RETRIES: usize = 64;

/// One published parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEntry {
    /// Module id.
    pub module: Ident,
    /// Parameter id.
    pub param: Ident,
    /// Smoothed value at the end of the last tick.
    pub current: f32,
    /// Value being smoothed toward.
    pub target: f32,
}

/// View of the parameter table inside a slot segment.
#[derive(Clone)]
pub struct ParamTable {
    segment: Arc<Segment>,
    header: usize,
    entries: usize,
    capacity: usize,
}

impl ParamTable {
    pub(crate) fn new(segment: Arc<Segment>, layout: &SegmentLayout) -> Self {
        Self {
            segment,
            header: layout.param_header(),
            entries: layout.param_entries(),
            capacity: layout.param_slots,
        }
    }

    #[inline]
    fn seq(&self) -> &AtomicU64 {
        self.segment.u64_at(self.header)
    }

    #[inline]
    fn count(&self) -> &AtomicU64 {
        self.segment.u64_at(self.header + 8)
    }

    #[inline]
    fn overflowed(&self) -> &AtomicU64 {
        self.segment.u64_at(self.header + 16)
    }

    #[inline]
    fn word(&self, index: usize, word: usize) -> &AtomicU64 {
        self.segment
            .u64_at(self.entries + index * PARAM_ENTRY_SIZE + word * 8)
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Completed publishes since the last reset.
    pub fn generation(&self) -> u64 {
        self.seq().load(Ordering::Acquire) / 2
    }

    /// True if the last publish had more entries than fit.
    pub fn overflowed_last_publish(&self) -> bool {
        self.overflowed().load(Ordering::Relaxed) != 0
    }

    /// Publishes a fresh table. Allocation-free; single writer only.
    pub fn publish(&self, fill: impl FnOnce(&mut ParamPublisher<'_>)) {
        let seq = self.seq().load(Ordering::Relaxed);
        self.seq().store(seq + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        let mut publisher = ParamPublisher {
            table: self,
            len: 0,
            overflow: false,
        };
        fill(&mut publisher);
        let (len, overflow) = (publisher.len, publisher.overflow);

        self.count().store(len as u64, Ordering::Relaxed);
        self.overflowed()
            .store(u64::from(overflow), Ordering::Relaxed);
        self.seq().store(seq + 2, Ordering::Release);
    }

    fn write_entry(&self, index: usize, module: &Ident, param: &Ident, current: f32, target: f32) {
        let [m0, m1] = split_field(module);
        let [p0, p1] = split_field(param);
        let values = u64::from(current.to_bits()) | (u64::from(target.to_bits()) << 32);
        for (i, word) in [m0, m1, p0, p1, values].into_iter().enumerate() {
            self.word(index, i).store(word, Ordering::Relaxed);
        }
    }

    /// Consistent copy of the table, or `None` if the writer kept it busy
    /// through every retry.
    pub fn snapshot(&self) -> Option<Vec<ParamEntry>> {
        let mut entries = Vec::with_capacity(self.capacity);
        for _ in 0..SNAPSHOT_RETRIES {
            let before = self.seq().load(Ordering::Acquire);
            if before % 2 == 1 {
                std::thread::yield_now();
                continue;
            }
            entries.clear();
            let count = (self.count().load(Ordering::Relaxed) as usize).min(self.capacity);
            for index in 0..count {
                let words: [u64; 5] =
                    std::array::from_fn(|i| self.word(index, i).load(Ordering::Relaxed));
                let (Some(module), Some(param)) =
                    (join_field(words[0], words[1]), join_field(words[2], words[3]))
                else {
                    continue;
                };
                entries.push(ParamEntry {
                    module,
                    param,
                    current: f32::from_bits(words[4] as u32),
                    target: f32::from_bits((words[4] >> 32) as u32),
                });
            }
            fence(Ordering::Acquire);
            if self.seq().load(Ordering::Relaxed) == before {
                return Some(entries);
            }
        }
        None
    }

    /// `(current, target)` of one parameter, from a fresh snapshot.
    pub fn get(&self, module: &str, param: &str) -> Option<(f32, f32)> {
        self.snapshot()?
            .into_iter()
            .find(|e| e.module.matches(module) && e.param.matches(param))
            .map(|e| (e.current, e.target))
    }

    /// Clears the table. The writer must be inactive.
    pub fn reset(&self) {
        self.seq().store(0, Ordering::Release);
        self.count().store(0, Ordering::Release);
        self.overflowed().store(0, Ordering::Release);
    }
}

/// Entry sink handed to [`ParamTable::publish`].
pub struct ParamPublisher<'a> {
    table: &'a ParamTable,
    len: usize,
    overflow: bool,
}

impl ParamPublisher<'_> {
    /// Appends one entry; entries beyond capacity are dropped and flagged.
    #[inline]
    pub fn push(&mut self, module: &Ident, param: &Ident, current: f32, target: f32) {
        if self.len >= self.table.capacity {
            self.overflow = true;
            return;
        }
        self.table
            .write_entry(self.len, module, param, current, target);
        self.len += 1;
    }
}

fn split_field(id: &Ident) -> [u64; 2] {
    let field = id.to_field();
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&field[..8]);
    hi.copy_from_slice(&field[8..]);
    [u64::from_le_bytes(lo), u64::from_le_bytes(hi)]
}

fn join_field(lo: u64, hi: u64) -> Option<Ident> {
    let mut field = [0u8; IDENT_LEN];
    field[..8].copy_from_slice(&lo.to_le_bytes());
    field[8..].copy_from_slice(&hi.to_le_bytes());
    Ident::from_field(&field).ok()
}

impl std::fmt::Debug for ParamTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamTable")
            .field("capacity", &self.capacity)
            .field("generation", &self.generation())
            .finish()
    }
}

//! Byte layout of a slot segment.
//!
//! ```text
//! offset  region
//! 0       header         magic, version, geometry            (1 line)
//! 64      worker control heartbeat, counters, ready, pid     (1 line)
//! 128     host control   shutdown, fault                     (1 line)
//! 192     audio writer   write_seq                           (1 line)
//! 256     audio reader   read_seq, underruns, repeats        (1 line)
//! 320     audio frames   slots * frame_len * f32
//! ...     command head   head                                (1 line)
//! ...     command tail   tail                                (1 line)
//! ...     command slots  slots * 64 bytes
//! ...     param header   seq, count                          (1 line)
//! ...     param entries  slots * 40 bytes
//! ```
//!
//! Every region starts on a 64-byte line so producer and consumer cursors
//! never share a cache line. All fields are 8-byte atomics except audio
//! samples, which are 4-byte atomics holding `f32` bit patterns.

use serde::{Deserialize, Serialize};
use tandem_core::COMMAND_SIZE;

use crate::error::{Result, ShmError};

/// Cache line size assumed by the layout.
pub const LINE: usize = 64;

/// `b"TANDEMSG"` as a little-endian word.
pub const MAGIC: u64 = u64::from_le_bytes(*b"TANDEMSG");

/// Layout version written into every header.
pub const LAYOUT_VERSION: u64 = 2;

/// Bytes per parameter-table entry: module id, param id, current|target.
pub const PARAM_ENTRY_SIZE: usize = 5 * 8;

const MAX_AUDIO_SLOTS: usize = 1024;
const MAX_FRAME_LEN: usize = 16384;
const MAX_COMMAND_SLOTS: usize = 1 << 16;
const MAX_PARAM_SLOTS: usize = 1 << 14;

// Header words.
pub(crate) const HDR_MAGIC: usize = 0;
pub(crate) const HDR_VERSION: usize = 8;
pub(crate) const HDR_AUDIO_SLOTS: usize = 16;
pub(crate) const HDR_FRAME_LEN: usize = 24;
pub(crate) const HDR_COMMAND_SLOTS: usize = 32;
pub(crate) const HDR_PARAM_SLOTS: usize = 40;
pub(crate) const HDR_TOTAL_LEN: usize = 48;

/// Ring geometry of one slot segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLayout {
    /// Frames the audio ring holds.
    pub audio_slots: usize,
    /// Samples per frame.
    pub frame_len: usize,
    /// Records the command ring holds (power of two).
    pub command_slots: usize,
    /// Parameter-table capacity.
    pub param_slots: usize,
}

fn align_line(n: usize) -> usize {
    n.div_ceil(LINE) * LINE
}

impl SegmentLayout {
    /// Validates the geometry.
    pub fn new(
        audio_slots: usize,
        frame_len: usize,
        command_slots: usize,
        param_slots: usize,
    ) -> Result<Self> {
        if !(2..=MAX_AUDIO_SLOTS).contains(&audio_slots) {
            return Err(ShmError::Geometry("audio slots must be in 2..=1024"));
        }
        if !(1..=MAX_FRAME_LEN).contains(&frame_len) {
            return Err(ShmError::Geometry("frame length must be in 1..=16384"));
        }
        if !command_slots.is_power_of_two() || command_slots > MAX_COMMAND_SLOTS {
            return Err(ShmError::Geometry(
                "command slots must be a power of two up to 65536",
            ));
        }
        if param_slots == 0 || param_slots > MAX_PARAM_SLOTS {
            return Err(ShmError::Geometry("param slots must be in 1..=16384"));
        }
        Ok(Self {
            audio_slots,
            frame_len,
            command_slots,
            param_slots,
        })
    }

    /// Worker-written control line.
    pub(crate) fn worker_control(&self) -> usize {
        LINE
    }

    /// Supervisor-written control line.
    pub(crate) fn host_control(&self) -> usize {
        2 * LINE
    }

    pub(crate) fn audio_writer(&self) -> usize {
        3 * LINE
    }

    pub(crate) fn audio_reader(&self) -> usize {
        4 * LINE
    }

    pub(crate) fn audio_frames(&self) -> usize {
        5 * LINE
    }

    fn audio_frames_len(&self) -> usize {
        align_line(self.audio_slots * self.frame_len * 4)
    }

    pub(crate) fn command_head(&self) -> usize {
        self.audio_frames() + self.audio_frames_len()
    }

    pub(crate) fn command_tail(&self) -> usize {
        self.command_head() + LINE
    }

    pub(crate) fn command_slots_offset(&self) -> usize {
        self.command_tail() + LINE
    }

    pub(crate) fn param_header(&self) -> usize {
        self.command_slots_offset() + self.command_slots * COMMAND_SIZE
    }

    pub(crate) fn param_entries(&self) -> usize {
        self.param_header() + LINE
    }

    /// Total segment size in bytes.
    pub fn total_len(&self) -> usize {
        align_line(self.param_entries() + self.param_slots * PARAM_ENTRY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_line_aligned_and_disjoint() {
        let layout = SegmentLayout::new(8, 250, 256, 128).unwrap();
        let offsets = [
            layout.worker_control(),
            layout.host_control(),
            layout.audio_writer(),
            layout.audio_reader(),
            layout.audio_frames(),
            layout.command_head(),
            layout.command_tail(),
            layout.command_slots_offset(),
            layout.param_header(),
            layout.param_entries(),
        ];
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for offset in offsets {
            assert_eq!(offset % LINE, 0, "offset {offset} not line aligned");
        }
        assert!(layout.command_head() >= layout.audio_frames() + 8 * 250 * 4);
        assert!(layout.total_len() >= layout.param_entries() + 128 * PARAM_ENTRY_SIZE);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(SegmentLayout::new(1, 256, 256, 128).is_err());
        assert!(SegmentLayout::new(8, 0, 256, 128).is_err());
        assert!(SegmentLayout::new(8, 256, 100, 128).is_err());
        assert!(SegmentLayout::new(8, 256, 256, 0).is_err());
    }
}

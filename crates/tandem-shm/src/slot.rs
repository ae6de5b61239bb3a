//! A worker slot's complete shared-memory segment.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::audio_ring::AudioRing;
use crate::command_ring::CommandRing;
use crate::control::Control;
use crate::error::{Result, ShmError};
use crate::layout::{
    HDR_AUDIO_SLOTS, HDR_COMMAND_SLOTS, HDR_FRAME_LEN, HDR_MAGIC, HDR_PARAM_SLOTS, HDR_TOTAL_LEN,
    HDR_VERSION, LAYOUT_VERSION, MAGIC, SegmentLayout,
};
use crate::param_table::ParamTable;
use crate::segment::Segment;

/// One slot's segment: header, control block, audio ring, command ring and
/// parameter table.
///
/// The supervisor [`create`](SlotSegment::create)s it; the worker
/// [`open`](SlotSegment::open)s the same file and reads the geometry from
/// the header.
#[derive(Debug, Clone)]
pub struct SlotSegment {
    segment: Arc<Segment>,
    layout: SegmentLayout,
}

impl SlotSegment {
    /// Creates and formats a segment at `path`.
    pub fn create(path: impl AsRef<Path>, layout: SegmentLayout) -> Result<Self> {
        let segment = Segment::create(path, layout.total_len())?;
        let header = [
            (HDR_VERSION, LAYOUT_VERSION),
            (HDR_AUDIO_SLOTS, layout.audio_slots as u64),
            (HDR_FRAME_LEN, layout.frame_len as u64),
            (HDR_COMMAND_SLOTS, layout.command_slots as u64),
            (HDR_PARAM_SLOTS, layout.param_slots as u64),
            (HDR_TOTAL_LEN, layout.total_len() as u64),
        ];
        for (offset, value) in header {
            segment.u64_at(offset).store(value, Ordering::Relaxed);
        }
        // Magic last: an opener that sees it sees the whole header.
        segment.u64_at(HDR_MAGIC).store(MAGIC, Ordering::Release);
        Ok(Self {
            segment: Arc::new(segment),
            layout,
        })
    }

    /// Maps an existing segment and validates its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let segment = Segment::open(path)?;
        if segment.len() < crate::layout::LINE {
            return Err(ShmError::Truncated {
                required: crate::layout::LINE,
                actual: segment.len(),
            });
        }
        if segment.u64_at(HDR_MAGIC).load(Ordering::Acquire) != MAGIC {
            return Err(ShmError::BadMagic(path.to_path_buf()));
        }
        let read = |offset| segment.u64_at(offset).load(Ordering::Relaxed);
        let version = read(HDR_VERSION);
        if version != LAYOUT_VERSION {
            return Err(ShmError::VersionMismatch {
                expected: LAYOUT_VERSION,
                found: version,
            });
        }
        let layout = SegmentLayout::new(
            read(HDR_AUDIO_SLOTS) as usize,
            read(HDR_FRAME_LEN) as usize,
            read(HDR_COMMAND_SLOTS) as usize,
            read(HDR_PARAM_SLOTS) as usize,
        )?;
        if segment.len() < layout.total_len() || read(HDR_TOTAL_LEN) as usize != layout.total_len()
        {
            return Err(ShmError::Truncated {
                required: layout.total_len(),
                actual: segment.len(),
            });
        }
        Ok(Self {
            segment: Arc::new(segment),
            layout,
        })
    }

    /// Geometry read from (or written to) the header.
    pub fn layout(&self) -> SegmentLayout {
        self.layout
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        self.segment.path()
    }

    /// True if this handle unlinks the file when the last clone drops.
    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    /// Audio ring view.
    pub fn audio(&self) -> AudioRing {
        AudioRing::new(Arc::clone(&self.segment), &self.layout)
    }

    /// Command ring view.
    pub fn commands(&self) -> CommandRing {
        CommandRing::new(Arc::clone(&self.segment), &self.layout)
    }

    /// Control block view.
    pub fn control(&self) -> Control {
        Control::new(Arc::clone(&self.segment), &self.layout)
    }

    /// Parameter table view.
    pub fn params(&self) -> ParamTable {
        ParamTable::new(Arc::clone(&self.segment), &self.layout)
    }

    /// Prepares the segment for a replacement worker.
    ///
    /// Commands, control and parameters are cleared. The audio ring keeps
    /// its sequence numbers because the audio callback may still be reading
    /// it; see [`AudioRing::recycle`].
    pub fn recycle(&self) {
        self.audio().recycle();
        self.commands().reset();
        self.control().reset();
        self.params().reset();
    }

    /// Returns every region to its initial state, keeping the header.
    ///
    /// Only call while no worker is attached.
    pub fn reset(&self) {
        self.audio().reset();
        self.commands().reset();
        self.control().reset();
        self.params().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reads_geometry_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SegmentLayout::new(8, 256, 256, 128).unwrap();
        let created = SlotSegment::create(dir.path().join("slot"), layout).unwrap();
        let opened = SlotSegment::open(created.path()).unwrap();
        assert_eq!(opened.layout(), layout);
        assert!(!opened.is_owner());
    }

    #[test]
    fn open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();
        assert!(matches!(
            SlotSegment::open(&path),
            Err(ShmError::BadMagic(_))
        ));
    }

    #[test]
    fn reset_clears_regions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SegmentLayout::new(4, 16, 8, 8).unwrap();
        let seg = SlotSegment::create(dir.path().join("slot"), layout).unwrap();
        seg.audio().write(&[1.0; 16]);
        seg.commands().try_write(&[2; 64]);
        seg.control().beat();
        seg.reset();
        assert_eq!(seg.audio().written(), 0);
        assert!(seg.commands().is_empty());
        assert_eq!(seg.control().heartbeat(), 0);
        assert_eq!(SlotSegment::open(seg.path()).unwrap().layout(), layout);
    }

    #[test]
    fn recycle_keeps_audio_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SegmentLayout::new(4, 16, 8, 8).unwrap();
        let seg = SlotSegment::create(dir.path().join("slot"), layout).unwrap();
        seg.audio().write(&[1.0; 16]);
        seg.commands().try_write(&[2; 64]);
        seg.control().beat();
        seg.recycle();
        assert_eq!(seg.audio().written(), 1);
        assert!(seg.commands().is_empty());
        assert_eq!(seg.control().heartbeat(), 0);
    }
}

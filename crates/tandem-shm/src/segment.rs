//! File-backed shared mapping with atomic field access.
//!
//! A [`Segment`] maps a file (normally on `/dev/shm`) read-write into the
//! process. Nothing ever borrows the mapping as a byte slice: every access
//! goes through [`Segment::u64_at`] or [`Segment::u32_at`], which hand out
//! references to atomics. Two processes mapping the same file therefore only
//! ever communicate through atomic loads and stores.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64};

use memmap2::{MmapOptions, MmapRaw};
use tracing::debug;

use crate::error::{Result, ShmError};

/// A mapped shared-memory file.
///
/// The creating side owns the file and unlinks it on drop; sides that
/// [`open`](Segment::open) an existing file leave it in place.
pub struct Segment {
    map: MmapRaw,
    path: PathBuf,
    owner: bool,
}

impl Segment {
    /// Creates (or truncates) `path` to `len` zeroed bytes and maps it.
    pub fn create(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ShmError::io(&path, e))?;
        file.set_len(len as u64)
            .map_err(|e| ShmError::io(&path, e))?;
        let map = MmapOptions::new()
            .len(len)
            .map_raw(&file)
            .map_err(|e| ShmError::io(&path, e))?;
        debug!(path = %path.display(), len, "segment created");
        // The mapping outlives the descriptor; dropping `file` keeps fd usage flat.
        Ok(Self {
            map,
            path,
            owner: true,
        })
    }

    /// Maps an existing segment file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ShmError::io(&path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ShmError::io(&path, e))?
            .len() as usize;
        if len < 8 {
            return Err(ShmError::Truncated {
                required: 8,
                actual: len,
            });
        }
        let map = MmapOptions::new()
            .len(len)
            .map_raw(&file)
            .map_err(|e| ShmError::io(&path, e))?;
        Ok(Self {
            map,
            path,
            owner: false,
        })
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if this side unlinks the file on drop.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Atomic word at `offset`.
    ///
    /// # Panics
    ///
    /// If `offset` is misaligned or out of bounds. Offsets come from a
    /// validated [`SegmentLayout`](crate::SegmentLayout), so this indicates
    /// a layout bug.
    #[allow(unsafe_code)]
    #[inline]
    pub(crate) fn u64_at(&self, offset: usize) -> &AtomicU64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.map.len());
        // SAFETY: the mapping is page-aligned, read-write and lives as long as
        // `self`; the offset is 8-aligned and in bounds (checked above). The
        // bytes are only ever accessed atomically, by this and other processes.
        unsafe { &*self.map.as_mut_ptr().add(offset).cast::<AtomicU64>() }
    }

    /// Atomic 32-bit cell at `offset`.
    ///
    /// # Panics
    ///
    /// If `offset` is misaligned or out of bounds.
    #[allow(unsafe_code)]
    #[inline]
    pub(crate) fn u32_at(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        // SAFETY: as for `u64_at`, with 4-byte alignment.
        unsafe { &*self.map.as_mut_ptr().add(offset).cast::<AtomicU32>() }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.owner {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "segment unlinked"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(path = %self.path.display(), error = %e, "segment unlink failed"),
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn create_open_share_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let owner = Segment::create(&path, 4096).unwrap();
        let peer = Segment::open(&path).unwrap();
        owner.u64_at(64).store(0xdead_beef, Ordering::Release);
        assert_eq!(peer.u64_at(64).load(Ordering::Acquire), 0xdead_beef);
        peer.u32_at(128).store(7, Ordering::Release);
        assert_eq!(owner.u32_at(128).load(Ordering::Acquire), 7);
        assert!(owner.is_owner());
        assert!(!peer.is_owner());
    }

    #[test]
    fn owner_unlinks_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let seg = Segment::create(&path, 1024).unwrap();
        assert!(path.exists());
        drop(seg);
        assert!(!path.exists());
    }

    #[test]
    fn opener_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let owner = Segment::create(&path, 1024).unwrap();
        drop(Segment::open(&path).unwrap());
        assert!(path.exists());
        drop(owner);
    }

    #[test]
    #[should_panic]
    fn misaligned_access_panics() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::create(dir.path().join("seg"), 1024).unwrap();
        let _ = seg.u64_at(3);
    }
}

//! Persisted segment registry for orphan reclaim.
//!
//! A supervisor killed with SIGKILL cannot unlink its segments. Every
//! segment it creates is therefore recorded in `segments.json` in the
//! runtime directory together with the creating process id. The next
//! supervisor start calls [`SegmentRegistry::reclaim_orphans`], which
//! deletes every segment whose owner is no longer alive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ShmError};

/// Registry file name inside the runtime directory.
pub const REGISTRY_FILE: &str = "segments.json";

/// One registered segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Segment name (unique per registry).
    pub name: String,
    /// Backing file.
    pub path: PathBuf,
    /// Process that created the segment.
    pub owner_pid: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    segments: Vec<RegistryEntry>,
}

/// Segment name → owning pid map, persisted as JSON.
#[derive(Debug, Clone)]
pub struct SegmentRegistry {
    dir: PathBuf,
    file: PathBuf,
}

impl SegmentRegistry {
    /// Registry stored in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file = dir.join(REGISTRY_FILE);
        Self { dir, file }
    }

    /// Runtime directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registry file path.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// All registered segments. A missing file is an empty registry.
    pub fn entries(&self) -> Result<Vec<RegistryEntry>> {
        match std::fs::read_to_string(&self.file) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str::<RegistryFile>(&text)?.segments),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ShmError::io(&self.file, e)),
        }
    }

    fn save(&self, segments: Vec<RegistryEntry>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ShmError::io(&self.dir, e))?;
        let text = serde_json::to_string_pretty(&RegistryFile { segments })?;
        let tmp = self.file.with_extension(format!("json.{}", std::process::id()));
        std::fs::write(&tmp, text).map_err(|e| ShmError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.file).map_err(|e| ShmError::io(&self.file, e))
    }

    /// Records `name` as owned by `owner_pid`, replacing any previous entry.
    pub fn register(&self, name: &str, path: &Path, owner_pid: u32) -> Result<()> {
        let mut segments = self.entries()?;
        segments.retain(|e| e.name != name);
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        segments.push(RegistryEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            owner_pid,
            created_at_ms,
        });
        self.save(segments)?;
        debug!(name, pid = owner_pid, "segment registered");
        Ok(())
    }

    /// Removes `name`. Returns whether it was present.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let mut segments = self.entries()?;
        let before = segments.len();
        segments.retain(|e| e.name != name);
        let removed = segments.len() != before;
        if removed {
            self.save(segments)?;
        }
        Ok(removed)
    }

    /// Deletes segments whose owner process is gone and drops their entries.
    ///
    /// Returns the reclaimed entries.
    pub fn reclaim_orphans(&self) -> Result<Vec<RegistryEntry>> {
        let segments = self.entries()?;
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        let (orphans, live): (Vec<_>, Vec<_>) = segments
            .into_iter()
            .partition(|e| !process_alive(e.owner_pid));
        for orphan in &orphans {
            match std::fs::remove_file(&orphan.path) {
                Ok(()) => info!(name = %orphan.name, pid = orphan.owner_pid, "reclaimed orphaned segment"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(name = %orphan.name, error = %e, "could not remove orphaned segment"),
            }
        }
        if !orphans.is_empty() {
            self.save(live)?;
        }
        Ok(orphans)
    }
}

/// True if a process with `pid` exists.
///
/// On platforms without `/proc` every process is assumed alive, so reclaim
/// never deletes a segment that might still be in use.
pub fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/proc").join(pid.to_string()).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SegmentRegistry::new(dir.path().join("runtime"));
        assert!(registry.entries().unwrap().is_empty());
        assert!(registry.reclaim_orphans().unwrap().is_empty());
    }

    #[test]
    fn register_replace_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SegmentRegistry::new(dir.path());
        let me = std::process::id();
        registry.register("a", &dir.path().join("a"), me).unwrap();
        registry.register("b", &dir.path().join("b"), me).unwrap();
        registry.register("a", &dir.path().join("a2"), me).unwrap();
        let entries = registry.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries.iter().find(|e| e.name == "a").unwrap().path,
            dir.path().join("a2")
        );
        assert!(registry.unregister("a").unwrap());
        assert!(!registry.unregister("a").unwrap());
        assert_eq!(registry.entries().unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reclaims_segments_of_dead_owners() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SegmentRegistry::new(dir.path());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let orphan = dir.path().join("orphan.shm");
        let live = dir.path().join("live.shm");
        std::fs::write(&orphan, b"x").unwrap();
        std::fs::write(&live, b"x").unwrap();
        registry.register("orphan", &orphan, dead_pid).unwrap();
        registry.register("live", &live, std::process::id()).unwrap();

        let reclaimed = registry.reclaim_orphans().unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].name, "orphan");
        assert!(!orphan.exists());
        assert!(live.exists());
        assert_eq!(registry.entries().unwrap().len(), 1);
    }
}

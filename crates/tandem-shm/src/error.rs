//! Error types for shared-memory operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from segment mapping, rings and the segment registry.
#[derive(Debug, Error)]
pub enum ShmError {
    /// File or mapping I/O failed.
    #[error("shared memory I/O on '{path}': {source}")]
    Io {
        /// Segment or registry path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a tandem segment.
    #[error("'{0}' is not a tandem segment (bad magic)")]
    BadMagic(PathBuf),

    /// The segment was written by an incompatible layout version.
    #[error("segment layout version {found}, expected {expected}")]
    VersionMismatch {
        /// Version this build understands.
        expected: u64,
        /// Version found in the header.
        found: u64,
    },

    /// The file is shorter than its header claims.
    #[error("segment is {actual} bytes, layout needs {required}")]
    Truncated {
        /// Bytes required by the layout.
        required: usize,
        /// Bytes actually mapped.
        actual: usize,
    },

    /// Geometry is zero, too large or not a power of two where required.
    #[error("invalid segment geometry: {0}")]
    Geometry(&'static str),

    /// The command ring stayed full past the write timeout.
    #[error("command ring full after {waited_ms} ms")]
    RingFull {
        /// How long the producer waited.
        waited_ms: u64,
    },

    /// The consumer cursor is ahead of the producer cursor.
    #[error("command ring cursors out of order (head {head}, tail {tail})")]
    CursorsCorrupt {
        /// Producer cursor.
        head: u64,
        /// Consumer cursor.
        tail: u64,
    },

    /// The registry file could not be parsed or written.
    #[error("segment registry: {0}")]
    Registry(#[from] serde_json::Error),
}

impl ShmError {
    /// Create an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ShmError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ShmError>;

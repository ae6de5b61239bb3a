//! Audio I/O for the tandem engine.
//!
//! This crate provides:
//!
//! - **Backends**: the [`AudioBackend`] trait with a cpal implementation
//!   ([`CpalBackend`]) and a timer-driven [`NullBackend`] for machines
//!   without an audio device
//! - **Offline rendering**: [`render_patch`] and [`render_to_wav`] run a
//!   patch in-process and write the result with `hound`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tandem_io::{BackendStreamConfig, backend_by_name};
//!
//! let backend = backend_by_name("null")?;
//! let stream = backend.build_output_stream(
//!     &BackendStreamConfig::default(),
//!     Box::new(|buffer: &mut [f32]| buffer.fill(0.0)),
//!     Box::new(|err| eprintln!("audio error: {err}")),
//! )?;
//! // Audio runs until `stream` is dropped.
//! ```

pub mod backend;
pub mod cpal_backend;
pub mod null_backend;
mod render;

pub use backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle,
    backend_by_name,
};
pub use cpal_backend::CpalBackend;
pub use null_backend::NullBackend;
pub use render::{RenderOptions, RenderSummary, render_patch, render_to_wav, write_wav};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No backend with this name.
    #[error("Unknown audio backend: {0}")]
    UnknownBackend(String),

    /// The patch could not be built for rendering.
    #[error("Patch error: {0}")]
    Host(#[from] tandem_core::HostError),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

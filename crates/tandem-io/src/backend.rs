//! Pluggable audio backend abstraction.
//!
//! The supervisor only ever sees a callback that fills interleaved `f32`
//! buffers; which platform API calls it is decided here. The trait uses boxed
//! closures rather than generics so a backend can be picked at runtime from
//! the command line, and streams are returned as a type-erased
//! [`StreamHandle`] that stops playback on drop.
//!
//! ```text
//!   AudioBoundary::fill  <-  OutputCallback  <-  CpalBackend | NullBackend
//! ```

use crate::cpal_backend::CpalBackend;
use crate::null_backend::NullBackend;
use crate::{Error, Result};

/// Audio device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Whether the device supports audio output.
    pub is_output: bool,
    /// Whether the device is the host default.
    pub is_default: bool,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// Configuration for building an output stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames; `None` lets the backend choose.
    pub buffer_size: Option<u32>,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Optional device name substring (system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: Some(256),
            channels: 2,
            device_name: None,
        }
    }
}

/// Type-erased stream handle.
///
/// The stream runs while this handle exists; dropping it stops playback.
pub struct StreamHandle {
    _inner: Box<dyn std::any::Any>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until the
    /// handle is dropped.
    pub fn new<T: 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Audio output callback.
///
/// Runs on the real-time thread and must fill the whole buffer of
/// interleaved samples (`[L0, R0, L1, R1, ...]` for stereo). It must not
/// allocate, lock or perform I/O.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Called with a human-readable message when the stream reports an error.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// An audio output API.
pub trait AudioBackend {
    /// Short name (`"cpal"`, `"null"`).
    fn name(&self) -> &str;

    /// Output devices this backend can open.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// Builds and starts an output stream that calls `callback` once per
    /// hardware buffer.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;
}

/// Backend names accepted by [`backend_by_name`].
pub const BACKENDS: [&str; 2] = ["cpal", "null"];

/// Creates a backend by name.
pub fn backend_by_name(name: &str) -> Result<Box<dyn AudioBackend>> {
    match name.to_ascii_lowercase().as_str() {
        "cpal" => Ok(Box::new(CpalBackend::new())),
        "null" | "none" => Ok(Box::new(NullBackend::new())),
        _ => Err(Error::UnknownBackend(name.to_string())),
    }
}

//! Headless backend: a timer thread that pulls buffers at the hardware rate
//! and discards them.
//!
//! Used on machines without an audio device and by end-to-end tests, where
//! the callback still has to run on schedule so the boundary's underrun and
//! repeat counters mean the same thing as with a real device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle,
};
use crate::{Error, Result};

/// Frames per callback when the config leaves the buffer size open.
const DEFAULT_BUFFER: u32 = 256;

/// Timer-driven backend with no device behind it.
#[derive(Debug, Clone, Default)]
pub struct NullBackend {
    callbacks: Arc<AtomicU64>,
}

impl NullBackend {
    /// Creates the backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks issued by every stream of this backend so far.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

struct NullStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(vec![AudioDevice {
            name: "null".to_string(),
            is_output: true,
            is_default: true,
            default_sample_rate: 48000,
        }])
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        _error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(Error::Stream(format!(
                "invalid stream format: {} Hz, {} channels",
                config.sample_rate, config.channels
            )));
        }
        let frames = config.buffer_size.unwrap_or(DEFAULT_BUFFER).max(1);
        let period = Duration::from_secs_f64(f64::from(frames) / f64::from(config.sample_rate));
        let mut buffer = vec![0.0f32; frames as usize * usize::from(config.channels)];

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let callbacks = Arc::clone(&self.callbacks);
        let thread = std::thread::Builder::new()
            .name("tandem-null-audio".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while flag.load(Ordering::Acquire) {
                    callback(&mut buffer);
                    callbacks.fetch_add(1, Ordering::Relaxed);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else if now - next > period * 8 {
                        next = now;
                    }
                }
            })?;

        tracing::info!(
            frames,
            channels = config.channels,
            sample_rate = config.sample_rate,
            "null output stream started"
        );
        Ok(StreamHandle::new(NullStream {
            running,
            thread: Some(thread),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendStreamConfig {
        BackendStreamConfig {
            sample_rate: 48000,
            buffer_size: Some(64),
            channels: 2,
            device_name: None,
        }
    }

    #[test]
    fn test_callback_runs_until_dropped() {
        let backend = NullBackend::new();
        let seen = Arc::new(AtomicU64::new(0));
        let lens = Arc::clone(&seen);
        let stream = backend
            .build_output_stream(
                &config(),
                Box::new(move |buf| {
                    assert_eq!(buf.len(), 128);
                    lens.fetch_add(1, Ordering::Relaxed);
                }),
                Box::new(|_| {}),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        drop(stream);
        let after_drop = seen.load(Ordering::Relaxed);
        assert!(after_drop >= 5, "only {after_drop} callbacks");
        assert_eq!(backend.callbacks(), after_drop);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(seen.load(Ordering::Relaxed), after_drop);
    }

    #[test]
    fn test_invalid_format_rejected() {
        let backend = NullBackend::new();
        let mut config = config();
        config.channels = 0;
        let result = backend.build_output_stream(&config, Box::new(|_| {}), Box::new(|_| {}));
        assert!(matches!(result, Err(Error::Stream(_))));
    }

    #[test]
    fn test_lists_one_device() {
        let devices = NullBackend::new().list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_default);
    }
}

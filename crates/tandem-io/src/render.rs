//! Offline rendering of a patch to a WAV file.
//!
//! Runs the same [`ModuleHost`] the workers run, in-process and as fast as
//! possible, so a patch can be auditioned or regression-tested without the
//! supervisor.

use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavWriter};
use tandem_core::{Command, ModuleHost, ModuleRegistry, PatchSpec};

use crate::Result;

/// Render settings.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per host tick.
    pub frame_len: usize,
    /// Length of the output.
    pub duration: Duration,
    /// Channels written to the file; the mono output is copied to each.
    pub channels: u16,
    /// Ticks run and discarded before the first recorded frame.
    pub warmup_ticks: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_len: 256,
            duration: Duration::from_secs(1),
            channels: 1,
            warmup_ticks: 0,
        }
    }
}

impl RenderOptions {
    /// Number of mono samples the render produces.
    pub fn total_samples(&self) -> usize {
        (self.duration.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }
}

/// Levels of a finished render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSummary {
    /// Samples per channel.
    pub samples: usize,
    /// Host ticks run, excluding warm-up.
    pub ticks: u64,
    /// Peak absolute sample value.
    pub peak: f32,
    /// Root-mean-square level.
    pub rms: f32,
}

impl RenderSummary {
    fn measure(samples: &[f32], ticks: u64) -> Self {
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let rms = if samples.is_empty() {
            0.0
        } else {
            let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            (sum / samples.len() as f64).sqrt() as f32
        };
        Self {
            samples: samples.len(),
            ticks,
            peak,
            rms,
        }
    }
}

/// Renders `spec` to mono samples.
///
/// `commands` are applied in order after warm-up and before the first
/// recorded frame. Commands addressed to modules that are not in the patch
/// are dropped, as a worker would.
pub fn render_patch(
    spec: &PatchSpec,
    commands: &[Command],
    options: &RenderOptions,
) -> Result<(Vec<f32>, RenderSummary)> {
    let registry = ModuleRegistry::new();
    let mut host = ModuleHost::from_spec(
        spec,
        &registry,
        options.sample_rate as f32,
        options.frame_len,
    )?;
    host.commit(options.warmup_ticks)?;
    for cmd in commands {
        host.apply(cmd);
    }

    let total = options.total_samples();
    let mut samples = Vec::with_capacity(total + options.frame_len);
    let mut frame = vec![0.0f32; options.frame_len];
    let mut ticks = 0u64;
    while samples.len() < total {
        host.process(&mut frame);
        samples.extend_from_slice(&frame);
        ticks += 1;
    }
    samples.truncate(total);

    let summary = RenderSummary::measure(&samples, ticks);
    tracing::debug!(
        samples = summary.samples,
        ticks,
        peak = summary.peak,
        "render finished"
    );
    Ok((samples, summary))
}

/// Writes mono `samples` as 32-bit float WAV, copying them to every channel.
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<()> {
    let spec = hound::WavSpec {
        channels: channels.max(1),
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        for _ in 0..spec.channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Renders `spec` and writes it to `path`.
pub fn render_to_wav(
    path: impl AsRef<Path>,
    spec: &PatchSpec,
    commands: &[Command],
    options: &RenderOptions,
) -> Result<RenderSummary> {
    let (samples, summary) = render_patch(spec, commands, options)?;
    write_wav(&path, &samples, options.sample_rate, options.channels)?;
    tracing::info!(
        path = %path.as_ref().display(),
        samples = summary.samples,
        channels = options.channels,
        "wrote render"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ms: u64) -> RenderOptions {
        RenderOptions {
            duration: Duration::from_millis(ms),
            frame_len: 64,
            ..RenderOptions::default()
        }
    }

    #[test]
    fn test_total_samples() {
        assert_eq!(options(100).total_samples(), 4800);
        assert_eq!(options(0).total_samples(), 0);
    }

    #[test]
    fn test_ungated_voice_is_silent() {
        let (samples, summary) = render_patch(&PatchSpec::default_voice(), &[], &options(50)).unwrap();
        assert_eq!(samples.len(), 2400);
        assert_eq!(summary.peak, 0.0);
    }

    #[test]
    fn test_gated_voice_sounds() {
        let commands = [Command::gate("env1", true).unwrap()];
        let (samples, summary) =
            render_patch(&PatchSpec::default_voice(), &commands, &options(100)).unwrap();
        assert_eq!(samples.len(), 4800);
        assert_eq!(summary.ticks, 75);
        assert!(summary.peak > 0.01);
        assert!(summary.rms > 0.0);
        assert!(samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let spec = PatchSpec::chain().with_module(tandem_core::ModuleSpec::new("x", "theremin"));
        assert!(matches!(
            render_patch(&spec, &[], &options(10)),
            Err(crate::Error::Host(_))
        ));
    }
}

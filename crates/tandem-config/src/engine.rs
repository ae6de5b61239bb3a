//! Engine configuration file.
//!
//! Every section and field is optional; missing values take the defaults
//! shown below.
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! frame_len = 256
//! channels = 2
//!
//! [rings]
//! audio_slots = 8
//! command_slots = 256
//! param_slots = 128
//! underrun_hold = 2
//!
//! [supervisor]
//! heartbeat_timeout_ms = 25
//! poll_interval_ms = 4
//! fast_poll_interval_ms = 1
//! quiet_period_ms = 2000
//! worker_mode = "process"
//!
//! [patch]
//! mode = "chain"
//! [[patch.modules]]
//! id = "osc1"
//! kind = "osc"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_core::PatchSpec;

use crate::error::ConfigError;
use crate::paths;

/// Audio format and device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per frame (one worker tick).
    pub frame_len: usize,
    /// Output channels; the mono frame is copied to each.
    pub channels: u16,
    /// Output device name substring; `None` picks the default device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_len: 256,
            channels: 2,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Duration of one frame at the configured rate.
    pub fn frame_period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_len as f64 / f64::from(self.sample_rate))
    }
}

/// Ring and table geometry of each slot segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Frames per audio ring.
    pub audio_slots: usize,
    /// Records per command ring (power of two).
    pub command_slots: usize,
    /// Entries in each published parameter table.
    pub param_slots: usize,
    /// How many times the audio boundary may repeat the last frame before
    /// emitting silence.
    pub underrun_hold: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            audio_slots: 8,
            command_slots: 256,
            param_slots: 128,
            underrun_hold: 2,
        }
    }
}

/// How workers are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Separate OS processes (the binary's hidden `worker` subcommand).
    #[default]
    Process,
    /// Threads inside the supervisor process. No crash isolation; for tests
    /// and embedding.
    Thread,
}

/// Supervisor timing and worker policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Heartbeat stall that marks a worker hung.
    pub heartbeat_timeout_ms: u64,
    /// Steady-state monitor poll interval.
    pub poll_interval_ms: u64,
    /// Poll interval right after an incident.
    pub fast_poll_interval_ms: u64,
    /// Incident-free time before polling relaxes back to baseline.
    pub quiet_period_ms: u64,
    /// Time a new worker has to become ready.
    pub spawn_timeout_ms: u64,
    /// Time a patch commit has to warm up the standby.
    pub commit_timeout_ms: u64,
    /// Time workers have to exit after shutdown is requested.
    pub shutdown_timeout_ms: u64,
    /// Time a broadcast may wait on a full command ring.
    pub command_write_timeout_ms: u64,
    /// Warm-up ticks a worker runs before reporting ready.
    pub warmup_ticks: usize,
    /// Delay before the first rebuild of a failed slot. Failed rebuilds
    /// back off exponentially from there.
    pub rebuild_delay_ms: u64,
    /// Rebuild the new standby with the committed patch after a commit.
    pub resync_after_commit: bool,
    /// Process or thread workers.
    pub worker_mode: WorkerMode,
    /// Worker executable; defaults to the running binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_exe: Option<PathBuf>,
    /// Directory for segments and the segment registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 25,
            poll_interval_ms: 4,
            fast_poll_interval_ms: 1,
            quiet_period_ms: 2000,
            spawn_timeout_ms: 3000,
            commit_timeout_ms: 3000,
            shutdown_timeout_ms: 1000,
            command_write_timeout_ms: 50,
            warmup_ticks: 4,
            rebuild_delay_ms: 0,
            resync_after_commit: true,
            worker_mode: WorkerMode::Process,
            worker_exe: None,
            runtime_dir: None,
        }
    }
}

impl SupervisorConfig {
    /// Heartbeat stall timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Baseline poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Post-incident poll interval.
    pub fn fast_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fast_poll_interval_ms)
    }

    /// Quiet period before relaxing.
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Spawn-to-ready timeout.
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    /// Commit warm-up timeout.
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Command ring back-pressure timeout.
    pub fn command_write_timeout(&self) -> Duration {
        Duration::from_millis(self.command_write_timeout_ms)
    }

    /// Hold-off before a failed slot is first rebuilt.
    pub fn rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.rebuild_delay_ms)
    }

    /// Configured runtime directory, or the platform default.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(paths::default_runtime_dir)
    }
}

fn default_patch() -> PatchSpec {
    PatchSpec::default_voice()
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Audio format.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Segment geometry.
    #[serde(default)]
    pub rings: RingConfig,
    /// Supervisor policy.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Patch started in both slots.
    #[serde(default = "default_patch")]
    pub patch: PatchSpec,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            rings: RingConfig::default(),
            supervisor: SupervisorConfig::default(),
            patch: default_patch(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Serializes the configuration to TOML text.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, else the default config file if it exists,
    /// else the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = paths::default_config_path();
        if default_path.is_file() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            paths::ensure_dir(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let text = self.to_toml()?;
        std::fs::write(path, text).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Sample rate as `f32`, as modules expect it.
    pub fn sample_rate(&self) -> f32 {
        self.audio.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::PatchMode;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.frame_len, 256);
        assert_eq!(config.rings.command_slots, 256);
        assert_eq!(config.supervisor.heartbeat_timeout_ms, 25);
        assert_eq!(config.supervisor.worker_mode, WorkerMode::Process);
        assert!(config.patch.contains("osc1"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml(
            r#"
            [audio]
            frame_len = 128

            [supervisor]
            worker_mode = "thread"
            heartbeat_timeout_ms = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.frame_len, 128);
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.supervisor.worker_mode, WorkerMode::Thread);
        assert_eq!(config.supervisor.heartbeat_timeout(), Duration::from_millis(200));
        assert_eq!(config.supervisor.poll_interval_ms, 4);
    }

    #[test]
    fn test_patch_section() {
        let config = EngineConfig::from_toml(
            r#"
            [patch]
            mode = "graph"
            [[patch.modules]]
            id = "gen"
            kind = "osc"
            params = { freq = 110.0 }
            [[patch.modules]]
            id = "filt"
            kind = "filter"
            [[patch.connections]]
            from = "gen"
            to = "filt"
            "#,
        )
        .unwrap();
        assert_eq!(config.patch.mode, PatchMode::Graph);
        assert_eq!(config.patch.modules.len(), 2);
        assert_eq!(config.patch.connections.len(), 1);
    }

    #[test]
    fn test_unknown_worker_mode_rejected() {
        let err = EngineConfig::from_toml("[supervisor]\nworker_mode = \"fiber\"\n");
        assert!(matches!(err, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");
        let mut config = EngineConfig::default();
        config.audio.device = Some("USB".into());
        config.supervisor.runtime_dir = Some(dir.path().join("rt"));
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_frame_period() {
        let audio = AudioConfig {
            sample_rate: 48000,
            frame_len: 480,
            ..AudioConfig::default()
        };
        assert_eq!(audio.frame_period(), Duration::from_millis(10));
    }
}

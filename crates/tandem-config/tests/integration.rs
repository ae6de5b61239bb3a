//! Integration tests for engine configuration files.

use std::fs;

use tandem_config::{ConfigError, EngineConfig, ValidationError, WorkerMode};
use tandem_core::PatchMode;
use tempfile::TempDir;

#[test]
fn test_full_file_loads_and_validates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        r#"
[audio]
sample_rate = 44100
frame_len = 64
channels = 1

[rings]
audio_slots = 4
command_slots = 64
param_slots = 32
underrun_hold = 0

[supervisor]
heartbeat_timeout_ms = 40
poll_interval_ms = 2
fast_poll_interval_ms = 1
quiet_period_ms = 500
worker_mode = "thread"
resync_after_commit = false

[patch]
mode = "graph"

[[patch.modules]]
id = "lfo"
kind = "osc"
params = { freq = 2.0 }

[[patch.modules]]
id = "vco"
kind = "osc"

[[patch.modules]]
id = "mix"
kind = "gain"

[[patch.connections]]
from = "lfo"
to = "mix"

[[patch.connections]]
from = "vco"
to = "mix"
"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.audio.sample_rate, 44100);
    assert_eq!(config.rings.underrun_hold, 0);
    assert_eq!(config.supervisor.worker_mode, WorkerMode::Thread);
    assert!(!config.supervisor.resync_after_commit);
    assert_eq!(config.patch.mode, PatchMode::Graph);
    assert_eq!(config.patch.modules[0].params["freq"], 2.0);
}

#[test]
fn test_load_rejects_cyclic_patch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        r#"
[patch]
mode = "graph"
[[patch.modules]]
id = "a"
kind = "gain"
generator = true
[[patch.modules]]
id = "b"
kind = "gain"
[[patch.connections]]
from = "a"
to = "b"
[[patch.connections]]
from = "b"
to = "a"
"#,
    )
    .unwrap();

    match EngineConfig::load(&path) {
        Err(ConfigError::Validation(ValidationError::Patch(msg))) => {
            assert!(msg.contains("cycle"), "unexpected message: {msg}");
        }
        other => panic!("expected patch validation error, got {other:?}"),
    }
}

#[test]
fn test_load_or_default_with_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[audio]\nframe_len = 32\n").unwrap();
    let config = EngineConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.audio.frame_len, 32);
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[audio\nframe_len = ").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_runtime_dir_override() {
    let mut config = EngineConfig::default();
    assert!(config.supervisor.runtime_dir().ends_with("tandem"));
    config.supervisor.runtime_dir = Some("/tmp/elsewhere".into());
    assert_eq!(
        config.supervisor.runtime_dir(),
        std::path::PathBuf::from("/tmp/elsewhere")
    );
}

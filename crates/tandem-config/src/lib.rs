//! Configuration for the tandem engine.
//!
//! Loads, validates and saves the TOML file that sets the audio format,
//! the geometry of each slot's shared-memory segment, the supervisor's
//! timing policy and the patch both workers start with. Also resolves the
//! platform directories for config files and runtime segments.
//!
//! # Example
//!
//! ```rust
//! use tandem_config::{EngineConfig, WorkerMode};
//!
//! let config = EngineConfig::from_toml(
//!     r#"
//!     [audio]
//!     frame_len = 128
//!
//!     [supervisor]
//!     worker_mode = "thread"
//!     "#,
//! )
//! .unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.supervisor.worker_mode, WorkerMode::Thread);
//! assert_eq!(config.audio.sample_rate, 48000);
//! ```

mod engine;
mod error;

/// Platform-specific paths for configuration and runtime segments.
pub mod paths;

/// Configuration validation.
pub mod validation;

pub use engine::{AudioConfig, EngineConfig, RingConfig, SupervisorConfig, WorkerMode};
pub use error::ConfigError;
pub use paths::{
    CONFIG_FILE, default_config_path, default_runtime_dir, ensure_dir, user_config_dir,
};
pub use validation::{ValidationError, ValidationResult, validate_config};

//! Engine configuration validation.
//!
//! [`validate_config`] checks every rule and reports all failures at once.

use thiserror::Error;

use tandem_core::{ModuleHost, ModuleRegistry};

use crate::engine::EngineConfig;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A size or rate that must be positive is zero.
    #[error("'{0}' must be greater than zero")]
    Zero(&'static str),

    /// A ring capacity that must be a power of two is not.
    #[error("'{field}' must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: usize,
    },

    /// A value is outside the supported range.
    #[error("'{field}' = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Rejected value.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },

    /// The post-incident poll interval is slower than the baseline.
    #[error("fast_poll_interval_ms ({fast}) must not exceed poll_interval_ms ({baseline})")]
    FastPollSlower {
        /// Fast interval in milliseconds.
        fast: u64,
        /// Baseline interval in milliseconds.
        baseline: u64,
    },

    /// The heartbeat timeout would flag healthy workers between ticks.
    #[error("heartbeat_timeout_ms ({timeout_ms}) must exceed one frame period ({frame_period_us} us)")]
    HeartbeatTooShort {
        /// Configured timeout.
        timeout_ms: u64,
        /// Frame period.
        frame_period_us: u64,
    },

    /// The configured patch does not build.
    #[error("patch: {0}")]
    Patch(String),

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Checks every rule and returns all failures.
pub fn validate_config(config: &EngineConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();
    let audio = &config.audio;
    let rings = &config.rings;
    let sup = &config.supervisor;

    if audio.sample_rate == 0 {
        errors.push(ValidationError::Zero("audio.sample_rate"));
    }
    if audio.frame_len == 0 {
        errors.push(ValidationError::Zero("audio.frame_len"));
    } else if audio.frame_len > 16384 {
        errors.push(ValidationError::OutOfRange {
            field: "audio.frame_len",
            value: audio.frame_len as u64,
            min: 1,
            max: 16384,
        });
    }
    if audio.channels == 0 {
        errors.push(ValidationError::Zero("audio.channels"));
    }

    if rings.audio_slots < 2 || rings.audio_slots > 1024 {
        errors.push(ValidationError::OutOfRange {
            field: "rings.audio_slots",
            value: rings.audio_slots as u64,
            min: 2,
            max: 1024,
        });
    }
    if !rings.command_slots.is_power_of_two() {
        errors.push(ValidationError::NotPowerOfTwo {
            field: "rings.command_slots",
            value: rings.command_slots,
        });
    }
    if rings.param_slots == 0 {
        errors.push(ValidationError::Zero("rings.param_slots"));
    }

    for (field, value) in [
        ("supervisor.heartbeat_timeout_ms", sup.heartbeat_timeout_ms),
        ("supervisor.poll_interval_ms", sup.poll_interval_ms),
        ("supervisor.fast_poll_interval_ms", sup.fast_poll_interval_ms),
        ("supervisor.spawn_timeout_ms", sup.spawn_timeout_ms),
        ("supervisor.commit_timeout_ms", sup.commit_timeout_ms),
        ("supervisor.command_write_timeout_ms", sup.command_write_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }
    if sup.fast_poll_interval_ms > sup.poll_interval_ms {
        errors.push(ValidationError::FastPollSlower {
            fast: sup.fast_poll_interval_ms,
            baseline: sup.poll_interval_ms,
        });
    }
    let period = audio.frame_period();
    if audio.sample_rate > 0 && sup.heartbeat_timeout() <= period {
        errors.push(ValidationError::HeartbeatTooShort {
            timeout_ms: sup.heartbeat_timeout_ms,
            frame_period_us: period.as_micros() as u64,
        });
    }

    if audio.sample_rate > 0
        && audio.frame_len > 0
        && let Err(e) = ModuleHost::from_spec(
            &config.patch,
            &ModuleRegistry::new(),
            config.sample_rate(),
            audio.frame_len,
        )
    {
        errors.push(ValidationError::Patch(e.to_string()));
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl EngineConfig {
    /// Validates the configuration. See [`validate_config`].
    pub fn validate(&self) -> ValidationResult<()> {
        validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use tandem_core::{ModuleSpec, PatchSpec};

    use super::*;

    #[test]
    fn test_default_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_frame_len() {
        let mut config = EngineConfig::default();
        config.audio.frame_len = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::Zero("audio.frame_len"))
        );
    }

    #[test]
    fn test_command_slots_power_of_two() {
        let mut config = EngineConfig::default();
        config.rings.command_slots = 100;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::NotPowerOfTwo { value: 100, .. })
        ));
    }

    #[test]
    fn test_fast_poll_slower_than_baseline() {
        let mut config = EngineConfig::default();
        config.supervisor.fast_poll_interval_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::FastPollSlower { .. })
        ));
    }

    #[test]
    fn test_heartbeat_shorter_than_frame() {
        let mut config = EngineConfig::default();
        config.audio.frame_len = 4800;
        config.supervisor.heartbeat_timeout_ms = 50;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::HeartbeatTooShort { .. })
        ));
    }

    #[test]
    fn test_invalid_patch() {
        let mut config = EngineConfig::default();
        config.patch = PatchSpec::graph()
            .with_module(ModuleSpec::new("gen", "osc"))
            .with_module(ModuleSpec::new("filt", "filter"));
        assert!(matches!(config.validate(), Err(ValidationError::Patch(_))));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = EngineConfig::default();
        config.audio.channels = 0;
        config.rings.param_slots = 0;
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }
}

//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use tandem_config::{EngineConfig, WorkerMode};
use tandem_core::{Command, PatchSpec};
use tandem_engine::Fault;
use tracing_subscriber::EnvFilter;

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
///
/// Worker processes inherit the environment, so one `RUST_LOG` controls
/// both sides.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();
}

/// Loads `path`, or the default config file, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    EngineConfig::load_or_default(path).with_context(|| match path {
        Some(path) => format!("loading config {}", path.display()),
        None => "loading default config".to_string(),
    })
}

/// Reads a patch description from a TOML file.
pub fn load_patch(path: &Path) -> anyhow::Result<PatchSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading patch {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing patch {}", path.display()))
}

/// A `module.param=value` assignment from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAssign {
    pub module: String,
    pub param: String,
    pub value: f64,
}

impl ParamAssign {
    /// The assignment as a SET command.
    pub fn to_command(&self) -> anyhow::Result<Command> {
        Command::set(&self.module, &self.param, self.value)
            .with_context(|| format!("invalid --set {}.{}", self.module, self.param))
    }
}

/// Parses `module.param=value`.
pub fn parse_assign(s: &str) -> Result<ParamAssign, String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid assignment '{s}' (expected module.param=value)"))?;
    let (module, param) = key
        .split_once('.')
        .ok_or_else(|| format!("invalid key '{key}' (expected module.param)"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{value}' for {key}"))?;
    Ok(ParamAssign {
        module: module.trim().to_string(),
        param: param.trim().to_string(),
        value,
    })
}

/// Which slot a fault targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    /// Whichever slot is active when the fault fires.
    Active,
    /// Whichever slot is standby when the fault fires.
    Standby,
    /// A fixed slot index.
    Index(usize),
}

impl SlotTarget {
    pub fn resolve(self, active: usize) -> usize {
        match self {
            Self::Active => active,
            Self::Standby => 1 - active,
            Self::Index(i) => i,
        }
    }
}

/// A `--fault` argument: `<active|standby|0|1>:<kill|crash|hang|exit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPlan {
    pub target: SlotTarget,
    pub fault: Fault,
}

pub fn parse_fault(s: &str) -> Result<FaultPlan, String> {
    let (target, fault) = s.split_once(':').unwrap_or(("active", s));
    let target = match target.to_ascii_lowercase().as_str() {
        "active" => SlotTarget::Active,
        "standby" => SlotTarget::Standby,
        other => SlotTarget::Index(
            other
                .parse()
                .map_err(|_| format!("invalid fault target '{other}'"))?,
        ),
    };
    let fault = Fault::from_str(fault)?;
    Ok(FaultPlan { target, fault })
}

pub fn parse_worker_mode(s: &str) -> Result<WorkerMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "process" => Ok(WorkerMode::Process),
        "thread" => Ok(WorkerMode::Thread),
        _ => Err(format!("invalid worker mode '{s}' (expected process or thread)")),
    }
}

/// Resolves the runtime directory from an override or the config.
pub fn runtime_dir(config: &EngineConfig, overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config.supervisor.runtime_dir())
}

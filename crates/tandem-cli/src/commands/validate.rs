//! Validate an engine config and, optionally, a patch file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tandem_config::{EngineConfig, ValidationError, validate_config};
use tandem_engine::PatchBuilder;

use super::common::load_patch;

#[derive(Args)]
pub struct ValidateArgs {
    /// Engine config file (TOML); built-in defaults if omitted
    config: Option<PathBuf>,

    /// Patch file (TOML) to check against the config's audio format
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Print the effective configuration
    #[arg(long)]
    print: bool,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_toml(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let name = args
        .config
        .as_ref()
        .map_or_else(|| "default config".to_string(), |p| p.display().to_string());

    if let Err(err) = validate_config(&config) {
        let errors = match err {
            ValidationError::Multiple(errors) => errors,
            single => vec![single],
        };
        eprintln!("{name}: {} problem(s)", errors.len());
        for e in &errors {
            eprintln!("  - {e}");
        }
        anyhow::bail!("invalid configuration");
    }
    println!("{name}: ok");

    if let Some(path) = &args.patch {
        let spec = load_patch(path)?;
        let mut builder = PatchBuilder::from_spec(&spec, config.sample_rate(), config.audio.frame_len)
            .with_context(|| format!("building {}", path.display()))?;
        let modules = builder
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        println!("{}: ok ({modules} modules)", path.display());
    }

    if args.print {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

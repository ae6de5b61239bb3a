//! Smoothed gain stage.

use crate::module::{Module, ModuleCore};
use crate::param::{ParamSpec, Smoothing};

const LEVEL: usize = 0;

const PARAMS: &[ParamSpec] = &[ParamSpec::new(
    "level",
    1.0,
    0.0,
    4.0,
    Smoothing::Exponential { time_ms: 10.0 },
)];

/// Multiplies its input by `level`.
#[derive(Debug)]
pub struct Gain {
    core: ModuleCore,
}

impl Gain {
    /// Creates a unity gain stage.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            core: ModuleCore::new(PARAMS, sample_rate),
        }
    }
}

impl Module for Gain {
    fn kind(&self) -> &'static str {
        "gain"
    }

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]) {
        match input {
            Some(input) => {
                for (out, &x) in output.iter_mut().zip(input) {
                    *out = x * self.core.params.advance(LEVEL);
                }
            }
            None => {
                self.core.params.advance_by(LEVEL, output.len());
                output.fill(0.0);
            }
        }
    }
}

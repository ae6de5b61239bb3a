//! Topology-preserving state-variable lowpass.

use core::f32::consts::PI;

use libm::tanf;

use crate::module::{Module, ModuleCore};
use crate::param::{ParamSpec, Smoothing};

const CUTOFF: usize = 0;
const RESONANCE: usize = 1;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new(
        "cutoff",
        2000.0,
        20.0,
        20000.0,
        Smoothing::Exponential { time_ms: 20.0 },
    ),
    ParamSpec::new(
        "resonance",
        0.2,
        0.0,
        1.0,
        Smoothing::Exponential { time_ms: 20.0 },
    ),
];

/// Lowpass with `cutoff` (Hz) and `resonance` (0-1).
#[derive(Debug)]
pub struct LowPass {
    core: ModuleCore,
    ic1eq: f32,
    ic2eq: f32,
    sample_rate: f32,
}

impl LowPass {
    /// Creates a filter at the given sample rate.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            core: ModuleCore::new(PARAMS, sample_rate),
            ic1eq: 0.0,
            ic2eq: 0.0,
            sample_rate,
        }
    }

    #[inline]
    fn tick(&mut self, x: f32) -> f32 {
        let cutoff = self
            .core
            .params
            .advance(CUTOFF)
            .min(self.sample_rate * 0.49);
        let resonance = self.core.params.advance(RESONANCE);
        let g = tanf(PI * cutoff / self.sample_rate);
        let k = 2.0 - 1.98 * resonance;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        let v3 = x - self.ic2eq;
        let v1 = a1 * self.ic1eq + a2 * v3;
        let v2 = self.ic2eq + a2 * self.ic1eq + a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        v2
    }
}

impl Module for LowPass {
    fn kind(&self) -> &'static str {
        "filter"
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
                    *out = self.tick(x);
                }
            }
            None => {
                for out in output.iter_mut() {
                    *out = self.tick(0.0);
                }
            }
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.core.params.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    fn internal_state(&self) -> Vec<f32> {
        vec![self.ic1eq, self.ic2eq]
    }

    fn restore_internal_state(&mut self, state: &[f32]) {
        if let [ic1eq, ic2eq] = *state {
            self.ic1eq = ic1eq;
            self.ic2eq = ic2eq;
        }
    }
}

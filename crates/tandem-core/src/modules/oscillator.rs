//! Phase-accumulator oscillator.

use core::f32::consts::TAU;

use libm::sinf;

use crate::module::{Module, ModuleCore};
use crate::param::{ParamSpec, Smoothing};

const FREQ: usize = 0;
const AMP: usize = 1;
const SHAPE: usize = 2;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new(
        "freq",
        220.0,
        0.01,
        20000.0,
        Smoothing::Exponential { time_ms: 5.0 },
    ),
    ParamSpec::new(
        "amp",
        0.5,
        0.0,
        1.0,
        Smoothing::Exponential { time_ms: 5.0 },
    ),
    ParamSpec::new("shape", 0.0, 0.0, 2.0, Smoothing::None),
];

/// Oscillator waveform, selected by the `shape` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// `shape = 0`
    Sine,
    /// `shape = 1`
    Saw,
    /// `shape = 2`
    Square,
}

impl Waveform {
    fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => Waveform::Saw,
            2 => Waveform::Square,
            _ => Waveform::Sine,
        }
    }
}

/// Generator with `freq` (Hz), `amp` and `shape` parameters.
///
/// Ignores its input if one is connected.
#[derive(Debug)]
pub struct Oscillator {
    core: ModuleCore,
    phase: f32,
    sample_rate: f32,
}

impl Oscillator {
    /// Creates an oscillator at the given sample rate.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            core: ModuleCore::new(PARAMS, sample_rate),
            phase: 0.0,
            sample_rate,
        }
    }

    /// Current waveform.
    pub fn waveform(&self) -> Waveform {
        Waveform::from_param(self.core.params.current(SHAPE))
    }
}

impl Module for Oscillator {
    fn kind(&self) -> &'static str {
        "osc"
    }

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn is_generator(&self) -> bool {
        true
    }

    fn process(&mut self, _input: Option<&[f32]>, output: &mut [f32]) {
        let waveform = self.waveform();
        let inv_sr = 1.0 / self.sample_rate;
        for sample in output.iter_mut() {
            let freq = self.core.params.advance(FREQ);
            let amp = self.core.params.advance(AMP);
            let raw = match waveform {
                Waveform::Sine => sinf(TAU * self.phase),
                Waveform::Saw => 2.0 * self.phase - 1.0,
                Waveform::Square => {
                    if self.phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
            };
            *sample = raw * amp;
            self.phase += freq * inv_sr;
            self.phase -= self.phase.floor();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.core.params.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn internal_state(&self) -> Vec<f32> {
        vec![self.phase]
    }

    fn restore_internal_state(&mut self, state: &[f32]) {
        if let Some(&phase) = state.first() {
            self.phase = phase.rem_euclid(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_signal() {
        let mut osc = Oscillator::new(48000.0);
        let mut out = [0.0f32; 256];
        osc.process(None, &mut out);
        assert!(out.iter().any(|s| s.abs() > 0.1));
        assert!(out.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn square_is_bipolar() {
        let mut osc = Oscillator::new(48000.0);
        osc.set_param("shape", 2.0, true).unwrap();
        osc.set_param("amp", 1.0, true).unwrap();
        let mut out = [0.0f32; 512];
        osc.process(None, &mut out);
        assert!(out.iter().all(|s| (s.abs() - 1.0).abs() < 1e-6));
        assert_eq!(osc.waveform(), Waveform::Square);
    }

    #[test]
    fn state_round_trip_keeps_phase() {
        let mut a = Oscillator::new(48000.0);
        let mut out = [0.0f32; 100];
        a.process(None, &mut out);
        let state = a.get_state();
        let mut b = Oscillator::new(48000.0);
        b.set_state(&state).unwrap();
        let mut out_a = [0.0f32; 64];
        let mut out_b = [0.0f32; 64];
        a.process(None, &mut out_a);
        b.process(None, &mut out_b);
        assert_eq!(out_a, out_b);
    }
}

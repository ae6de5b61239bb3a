//! Linear-segment ADSR envelope.
//!
//! With an input connected the envelope acts as a VCA; without one it
//! outputs the envelope level itself.

use crate::module::{Module, ModuleCore};
use crate::param::{ParamSpec, Smoothing};

const ATTACK: usize = 0;
const DECAY: usize = 1;
const SUSTAIN: usize = 2;
const RELEASE: usize = 3;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("attack", 5.0, 0.1, 10000.0, Smoothing::None),
    ParamSpec::new("decay", 50.0, 0.1, 10000.0, Smoothing::None),
    ParamSpec::new(
        "sustain",
        0.7,
        0.0,
        1.0,
        Smoothing::Exponential { time_ms: 5.0 },
    ),
    ParamSpec::new("release", 200.0, 0.1, 30000.0, Smoothing::None),
];

/// Envelope stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Output is zero.
    #[default]
    Idle,
    /// Rising toward 1.
    Attack,
    /// Falling toward the sustain level.
    Decay,
    /// Holding the sustain level while gated.
    Sustain,
    /// Falling toward 0 after release.
    Release,
}

impl EnvelopeStage {
    fn to_f32(self) -> f32 {
        match self {
            EnvelopeStage::Idle => 0.0,
            EnvelopeStage::Attack => 1.0,
            EnvelopeStage::Decay => 2.0,
            EnvelopeStage::Sustain => 3.0,
            EnvelopeStage::Release => 4.0,
        }
    }

    fn from_f32(v: f32) -> Self {
        match v as i32 {
            1 => EnvelopeStage::Attack,
            2 => EnvelopeStage::Decay,
            3 => EnvelopeStage::Sustain,
            4 => EnvelopeStage::Release,
            _ => EnvelopeStage::Idle,
        }
    }
}

/// ADSR envelope with `attack`, `decay`, `release` (ms) and `sustain` (0-1).
#[derive(Debug)]
pub struct Envelope {
    core: ModuleCore,
    stage: EnvelopeStage,
    level: f32,
    release_step: f32,
    sample_rate: f32,
}

impl Envelope {
    /// Creates an idle envelope.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            core: ModuleCore::new(PARAMS, sample_rate),
            stage: EnvelopeStage::Idle,
            level: 0.0,
            release_step: 0.0,
            sample_rate,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current output level.
    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    fn ms_to_samples(&self, ms: f32) -> f32 {
        (ms * 0.001 * self.sample_rate).max(1.0)
    }

    #[inline]
    fn next_level(&mut self) -> f32 {
        let sustain = self.core.params.advance(SUSTAIN);
        match self.stage {
            EnvelopeStage::Idle => self.level = 0.0,
            EnvelopeStage::Attack => {
                self.level += 1.0 / self.ms_to_samples(self.core.params.current(ATTACK));
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                let step = (1.0 - sustain) / self.ms_to_samples(self.core.params.current(DECAY));
                self.level -= step;
                if self.level <= sustain {
                    self.level = sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => self.level = sustain,
            EnvelopeStage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }
}

impl Module for Envelope {
    fn kind(&self) -> &'static str {
        "env"
    }

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn gate(&mut self, on: bool) {
        self.core.gate = on;
        if on {
            self.stage = EnvelopeStage::Attack;
        } else if self.stage != EnvelopeStage::Idle {
            self.release_step =
                self.level / self.ms_to_samples(self.core.params.current(RELEASE));
            self.stage = EnvelopeStage::Release;
        }
    }

    fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]) {
        match input {
            Some(input) => {
                for (out, &x) in output.iter_mut().zip(input) {
                    *out = x * self.next_level();
                }
            }
            None => {
                for out in output.iter_mut() {
                    *out = self.next_level();
                }
            }
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.core.params.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
        self.release_step = 0.0;
    }

    fn internal_state(&self) -> Vec<f32> {
        vec![self.stage.to_f32(), self.level, self.release_step]
    }

    fn restore_internal_state(&mut self, state: &[f32]) {
        if let [stage, level, release_step] = *state {
            self.stage = EnvelopeStage::from_f32(stage);
            self.level = level;
            self.release_step = release_step;
        }
    }
}

//! Parameter storage and smoothing.
//!
//! Modules keep their parameters in a [`ParamSet`], built once from a static
//! table of [`ParamSpec`]s. Each parameter has a current value, a target and
//! a smoothing policy. `SET` commands move the target; the audio path calls
//! [`ParamSet::advance`] once per sample and the current value approaches
//! the target exponentially.
//!
//! ## Usage
//!
//! ```rust
//! use tandem_core::param::{ParamSet, ParamSpec, Smoothing};
//!
//! const SPECS: &[ParamSpec] = &[ParamSpec::new("level", 1.0, 0.0, 2.0, Smoothing::Exponential { time_ms: 10.0 })];
//! let mut params = ParamSet::new(SPECS, 48000.0);
//! params.set("level", 0.5, false).unwrap();
//! for _ in 0..4800 {
//!     let _gain = params.advance(0);
//! }
//! assert_eq!(params.current(0), 0.5);
//! ```

use libm::expf;
use serde::{Deserialize, Serialize};

use crate::ident::Ident;
use crate::module::ModuleError;

/// Relative distance below which a smoothed value snaps onto its target.
///
/// Keeps two instances that received the same commands bit-identical once
/// they settle, regardless of when each started smoothing.
const SETTLE_RATIO: f32 = 1e-4;

/// A parameter with built-in exponential smoothing.
///
/// One-pole lowpass toward the target: `y[n] = y[n-1] + coeff * (target - y[n-1])`.
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    coeff: f32,
    sample_rate: f32,
    smoothing_time_ms: f32,
}

impl SmoothedParam {
    /// Creates a parameter with no smoothing.
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: 1.0,
            sample_rate: 48000.0,
            smoothing_time_ms: 0.0,
        }
    }

    /// Creates a parameter with full configuration.
    pub fn with_config(initial: f32, sample_rate: f32, smoothing_time_ms: f32) -> Self {
        let mut param = Self::new(initial);
        param.sample_rate = sample_rate;
        param.smoothing_time_ms = smoothing_time_ms;
        param.recalculate_coeff();
        param
    }

    /// Sets the value to smooth toward.
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Sets target and current together.
    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.target = value;
        self.current = value;
    }

    /// Updates the sample rate and recalculates the coefficient.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_coeff();
    }

    /// Sets the smoothing time constant in milliseconds (0 = instant).
    pub fn set_smoothing_time_ms(&mut self, time_ms: f32) {
        self.smoothing_time_ms = time_ms;
        self.recalculate_coeff();
    }

    /// Advances by one sample and returns the new current value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        let delta = self.target - self.current;
        if delta.abs() <= SETTLE_RATIO * self.target.abs().max(1.0) {
            self.current = self.target;
        } else {
            self.current += self.coeff * delta;
        }
        self.current
    }

    /// Advances by `samples` samples without producing per-sample output.
    #[inline]
    pub fn advance_by(&mut self, samples: usize) -> f32 {
        for _ in 0..samples {
            if self.is_settled() {
                break;
            }
            self.advance();
        }
        self.current
    }

    /// Current smoothed value.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Target value.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Smoothing time in milliseconds.
    #[inline]
    pub fn smoothing_time_ms(&self) -> f32 {
        self.smoothing_time_ms
    }

    /// True once the current value has reached the target.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Jumps the current value to the target.
    #[inline]
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
    }

    /// `coeff = 1 - exp(-1 / (tau * sample_rate))` with `tau` in seconds;
    /// a zero time constant gives `coeff = 1` (instant).
    fn recalculate_coeff(&mut self) {
        if self.smoothing_time_ms <= 0.0 || self.sample_rate <= 0.0 {
            self.coeff = 1.0;
        } else {
            let samples = self.smoothing_time_ms / 1000.0 * self.sample_rate;
            self.coeff = 1.0 - expf(-1.0 / samples);
        }
    }
}

impl Default for SmoothedParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// How a parameter's current value follows its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    /// Exponential approach with the given time constant.
    Exponential {
        /// Time constant in milliseconds.
        time_ms: f32,
    },
    /// Current jumps to the target on every change (discrete parameters).
    None,
}

impl Smoothing {
    fn time_ms(self) -> f32 {
        match self {
            Smoothing::Exponential { time_ms } => time_ms,
            Smoothing::None => 0.0,
        }
    }
}

/// Static description of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter name as addressed by commands.
    pub name: &'static str,
    /// Initial value.
    pub default: f32,
    /// Lower bound (inclusive).
    pub min: f32,
    /// Upper bound (inclusive).
    pub max: f32,
    /// Smoothing policy.
    pub smoothing: Smoothing,
}

impl ParamSpec {
    /// Creates a parameter description.
    pub const fn new(
        name: &'static str,
        default: f32,
        min: f32,
        max: f32,
        smoothing: Smoothing,
    ) -> Self {
        Self {
            name,
            default,
            min,
            max,
            smoothing,
        }
    }

    /// Clamps `value` into `[min, max]`.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

struct Param {
    name: Ident,
    spec: ParamSpec,
    value: SmoothedParam,
}

/// Snapshot of one parameter, used by `get_state`/`set_state` and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    /// Parameter name.
    pub name: String,
    /// Current (smoothed) value.
    pub current: f32,
    /// Target value.
    pub target: f32,
}

/// The parameters of one module, in declaration order.
///
/// Built once at module construction; nothing here allocates afterwards.
pub struct ParamSet {
    params: Vec<Param>,
}

impl ParamSet {
    /// Builds a set from static specs at the given sample rate.
    ///
    /// Spec names must be valid identifiers; invalid ones are skipped.
    pub fn new(specs: &'static [ParamSpec], sample_rate: f32) -> Self {
        let params = specs
            .iter()
            .filter_map(|spec| {
                let name = Ident::new(spec.name).ok()?;
                let mut value = SmoothedParam::with_config(
                    spec.default,
                    sample_rate,
                    spec.smoothing.time_ms(),
                );
                value.snap_to_target();
                Some(Param {
                    name,
                    spec: *spec,
                    value,
                })
            })
            .collect();
        Self { params }
    }

    /// Number of parameters.
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if the set has no parameters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Index of the parameter called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name.matches(name))
    }

    /// Sets a parameter by name. Values are clamped to the declared range.
    ///
    /// With `immediate`, current and target jump together; otherwise only
    /// the target moves. Parameters with [`Smoothing::None`] always jump.
    pub fn set(&mut self, name: &str, value: f32, immediate: bool) -> Result<(), ModuleError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| ModuleError::UnknownParam(name.to_string()))?;
        self.set_index(idx, value, immediate);
        Ok(())
    }

    /// Sets a parameter by index (no lookup, no allocation).
    #[inline]
    pub fn set_index(&mut self, idx: usize, value: f32, immediate: bool) {
        let param = &mut self.params[idx];
        let value = param.spec.clamp(value);
        if immediate || param.spec.smoothing == Smoothing::None {
            param.value.set_immediate(value);
        } else {
            param.value.set_target(value);
        }
    }

    /// Advances parameter `idx` by one sample and returns its value.
    #[inline]
    pub fn advance(&mut self, idx: usize) -> f32 {
        self.params[idx].value.advance()
    }

    /// Advances parameter `idx` by a whole buffer and returns its value.
    #[inline]
    pub fn advance_by(&mut self, idx: usize, samples: usize) -> f32 {
        self.params[idx].value.advance_by(samples)
    }

    /// Current value of parameter `idx`.
    #[inline]
    pub fn current(&self, idx: usize) -> f32 {
        self.params[idx].value.get()
    }

    /// Target value of parameter `idx`.
    #[inline]
    pub fn target(&self, idx: usize) -> f32 {
        self.params[idx].value.target()
    }

    /// Current value of the parameter called `name`.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.index_of(name).map(|idx| self.current(idx))
    }

    /// Spec of parameter `idx`.
    pub fn spec(&self, idx: usize) -> &ParamSpec {
        &self.params[idx].spec
    }

    /// Updates every parameter's smoothing coefficient.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        for param in &mut self.params {
            param.value.set_sample_rate(sample_rate);
        }
    }

    /// Snaps every parameter to its target.
    pub fn snap_all(&mut self) {
        for param in &mut self.params {
            param.value.snap_to_target();
        }
    }

    /// Restores every parameter to its default value.
    pub fn reset_to_defaults(&mut self) {
        for param in &mut self.params {
            param.value.set_immediate(param.spec.default);
        }
    }

    /// Visits `(name, current, target)` for every parameter without allocating.
    pub fn for_each(&self, mut f: impl FnMut(&Ident, f32, f32)) {
        for param in &self.params {
            f(&param.name, param.value.get(), param.value.target());
        }
    }

    /// Allocating snapshot of every parameter.
    pub fn snapshot(&self) -> Vec<ParamState> {
        self.params
            .iter()
            .map(|p| ParamState {
                name: p.name.as_str().to_string(),
                current: p.value.get(),
                target: p.value.target(),
            })
            .collect()
    }

    /// Restores values from a snapshot. Unknown names are rejected.
    pub fn restore(&mut self, states: &[ParamState]) -> Result<(), ModuleError> {
        for state in states {
            let idx = self
                .index_of(&state.name)
                .ok_or_else(|| ModuleError::UnknownParam(state.name.clone()))?;
            let param = &mut self.params[idx];
            param.value.set_immediate(param.spec.clamp(state.current));
            param.value.set_target(param.spec.clamp(state.target));
        }
        Ok(())
    }
}

impl core::fmt::Debug for ParamSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_map();
        for param in &self.params {
            list.entry(&param.name.as_str(), &param.value.get());
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::new(
            "freq",
            220.0,
            20.0,
            20000.0,
            Smoothing::Exponential { time_ms: 5.0 },
        ),
        ParamSpec::new("shape", 0.0, 0.0, 2.0, Smoothing::None),
    ];

    #[test]
    fn smoothed_param_converges() {
        let mut param = SmoothedParam::with_config(0.0, 48000.0, 10.0);
        param.set_target(1.0);
        for _ in 0..4800 {
            param.advance();
        }
        assert!(param.is_settled());
        assert_eq!(param.get(), 1.0);
    }

    #[test]
    fn smoothed_param_moves_gradually() {
        let mut param = SmoothedParam::with_config(0.0, 48000.0, 10.0);
        param.set_target(1.0);
        let first = param.advance();
        assert!(first > 0.0 && first < 0.01);
    }

    #[test]
    fn zero_time_is_instant() {
        let mut param = SmoothedParam::with_config(0.0, 48000.0, 0.0);
        param.set_target(3.0);
        assert_eq!(param.advance(), 3.0);
    }

    #[test]
    fn set_moves_target_only() {
        let mut set = ParamSet::new(SPECS, 48000.0);
        set.set("freq", 440.0, false).unwrap();
        assert_eq!(set.current(0), 220.0);
        assert_eq!(set.target(0), 440.0);
        set.advance_by(0, 256 * 10);
        assert_eq!(set.current(0), 440.0);
    }

    #[test]
    fn immediate_jumps_both() {
        let mut set = ParamSet::new(SPECS, 48000.0);
        set.set("freq", 880.0, true).unwrap();
        assert_eq!(set.current(0), 880.0);
        assert_eq!(set.target(0), 880.0);
    }

    #[test]
    fn discrete_params_never_smooth() {
        let mut set = ParamSet::new(SPECS, 48000.0);
        set.set("shape", 2.0, false).unwrap();
        assert_eq!(set.current(1), 2.0);
    }

    #[test]
    fn values_are_clamped() {
        let mut set = ParamSet::new(SPECS, 48000.0);
        set.set("freq", 1e9, true).unwrap();
        assert_eq!(set.current(0), 20000.0);
    }

    #[test]
    fn unknown_param_is_an_error() {
        let mut set = ParamSet::new(SPECS, 48000.0);
        assert!(matches!(
            set.set("nope", 1.0, false),
            Err(ModuleError::UnknownParam(_))
        ));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut a = ParamSet::new(SPECS, 48000.0);
        a.set("freq", 330.0, false).unwrap();
        a.advance(0);
        let snap = a.snapshot();
        let mut b = ParamSet::new(SPECS, 48000.0);
        b.restore(&snap).unwrap();
        assert_eq!(b.snapshot(), snap);
    }
}

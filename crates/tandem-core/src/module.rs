//! The module capability contract.
//!
//! Every signal-processing unit a host can run implements [`Module`]. The
//! contract is small on purpose: parameter access, an optional gate, one
//! buffer of processing and snapshot/restore.
//!
//! ## Design Decisions
//!
//! - **Object-safe**: hosts store `Box<dyn Module>` in an arena and dispatch
//!   through the vtable, so the set of module kinds is open.
//! - **Real-time `process`**: one call renders exactly one buffer. It must not
//!   allocate, block, or perform I/O. Everything a module needs is sized at
//!   construction time.
//! - **Shared bookkeeping in [`ModuleCore`]**: parameters, the activity flag
//!   and the gate live in one struct so the default trait methods can do the
//!   parameter plumbing and implementations only write DSP.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::param::{ParamSet, ParamSpec, ParamState};

/// Errors from parameter access and state restore.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleError {
    /// The named parameter does not exist on this module.
    #[error("unknown parameter '{0}'")]
    UnknownParam(String),
    /// A state snapshot belongs to a different module kind.
    #[error("state for kind '{found}' cannot be applied to '{expected}'")]
    KindMismatch {
        /// Kind of the receiving module.
        expected: String,
        /// Kind recorded in the snapshot.
        found: String,
    },
}

/// Parameters, activity and gate state shared by every module.
#[derive(Debug)]
pub struct ModuleCore {
    /// Parameter storage.
    pub params: ParamSet,
    /// Inactive modules are bypassed by the host.
    pub active: bool,
    /// Last gate value received.
    pub gate: bool,
}

impl ModuleCore {
    /// Creates an active, un-gated core with the given parameters.
    pub fn new(specs: &'static [ParamSpec], sample_rate: f32) -> Self {
        Self {
            params: ParamSet::new(specs, sample_rate),
            active: true,
            gate: false,
        }
    }
}

/// Serialisable snapshot of a module, for debugging and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Module kind (`"osc"`, `"env"`, ...).
    pub kind: String,
    /// Activity flag.
    pub active: bool,
    /// Gate flag.
    pub gate: bool,
    /// All parameters.
    pub params: Vec<ParamState>,
    /// Kind-specific history (phase, filter memory, envelope level).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal: Vec<f32>,
}

/// A signal-processing unit driven by a module host.
pub trait Module: Send {
    /// Short kind name, as used by the registry.
    fn kind(&self) -> &'static str;

    /// Shared bookkeeping.
    fn core(&self) -> &ModuleCore;

    /// Shared bookkeeping, mutably.
    fn core_mut(&mut self) -> &mut ModuleCore;

    /// Renders one buffer.
    ///
    /// `input` is `None` for modules with no upstream connection. `output`
    /// always has the host's frame length. Must not allocate or block.
    fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]);

    /// True if the module produces signal without an input.
    fn is_generator(&self) -> bool {
        false
    }

    /// Sets a parameter, clamped to its range.
    ///
    /// With `immediate` the value jumps; otherwise it is smoothed according
    /// to the parameter's policy over the following buffers.
    fn set_param(&mut self, name: &str, value: f32, immediate: bool) -> Result<(), ModuleError> {
        self.core_mut().params.set(name, value, immediate)
    }

    /// Sets a parameter by its index in the module's [`ParamSet`].
    ///
    /// The host resolves names with [`ParamSet::index_of`] and calls this
    /// from the audio path, so it must not allocate.
    fn set_param_at(&mut self, idx: usize, value: f32, immediate: bool) {
        self.core_mut().params.set_index(idx, value, immediate);
    }

    /// Current value of a parameter.
    fn param(&self, name: &str) -> Option<f32> {
        self.core().params.get(name)
    }

    /// Trigger (`true`) or release (`false`).
    fn gate(&mut self, on: bool) {
        self.core_mut().gate = on;
    }

    /// Activity flag.
    fn is_active(&self) -> bool {
        self.core().active
    }

    /// Sets the activity flag.
    fn set_active(&mut self, active: bool) {
        self.core_mut().active = active;
    }

    /// Updates sample-rate-dependent state.
    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.core_mut().params.set_sample_rate(sample_rate);
    }

    /// Clears history (phase, filter memory) without touching parameters.
    fn reset(&mut self) {}

    /// Kind-specific history for [`Module::get_state`].
    fn internal_state(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Restores history captured by [`Module::internal_state`].
    fn restore_internal_state(&mut self, _state: &[f32]) {}

    /// Captures a snapshot. Allocates; never call from the audio path.
    fn get_state(&self) -> ModuleState {
        let core = self.core();
        ModuleState {
            kind: self.kind().to_string(),
            active: core.active,
            gate: core.gate,
            params: core.params.snapshot(),
            internal: self.internal_state(),
        }
    }

    /// Restores a snapshot taken from a module of the same kind.
    fn set_state(&mut self, state: &ModuleState) -> Result<(), ModuleError> {
        if state.kind != self.kind() {
            return Err(ModuleError::KindMismatch {
                expected: self.kind().to_string(),
                found: state.kind.clone(),
            });
        }
        let core = self.core_mut();
        core.params.restore(&state.params)?;
        core.active = state.active;
        core.gate = state.gate;
        self.restore_internal_state(&state.internal);
        Ok(())
    }
}

/// Runs one buffer through `module`, bypassing it when inactive.
///
/// An inactive module copies its input through, or writes silence if it has
/// none.
#[inline]
pub(crate) fn render(module: &mut dyn Module, input: Option<&[f32]>, output: &mut [f32]) {
    if module.is_active() {
        module.process(input, output);
    } else {
        match input {
            Some(input) => output.copy_from_slice(input),
            None => output.fill(0.0),
        }
    }
}

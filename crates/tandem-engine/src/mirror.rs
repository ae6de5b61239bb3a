//! Supervisor-side mirror of the synchronized module state.
//!
//! Every broadcast command is recorded here before it reaches the rings.
//! A replacement worker is seeded from the mirror, so it starts with the
//! same parameter targets, gates and activity flags as the worker it will
//! run beside.

use std::collections::BTreeMap;

use tandem_core::{ACTIVE_PARAM, Command, GATE_PARAM, Ident, Op, ValueType};

use crate::worker::{SeedCommand, SeedKind};

/// Last value per `(module, param)`, gate and activity flag.
#[derive(Debug, Clone, Default)]
pub struct ParamMirror {
    params: BTreeMap<(Ident, Ident), f64>,
    active: BTreeMap<Ident, bool>,
    gates: BTreeMap<Ident, bool>,
}

impl ParamMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one command.
    pub fn record(&mut self, cmd: &Command) {
        match (cmd.op, cmd.value_type) {
            (Op::Gate, _) => {
                self.gates.insert(cmd.module_id, cmd.as_bool());
            }
            (Op::Set, ValueType::Bool) if cmd.param_id.matches(ACTIVE_PARAM) => {
                self.active.insert(cmd.module_id, cmd.as_bool());
            }
            (Op::Set, _) => {
                self.params.insert((cmd.module_id, cmd.param_id), cmd.value);
            }
        }
    }

    /// Last value set for a parameter.
    pub fn param(&self, module: &str, param: &str) -> Option<f64> {
        self.params
            .iter()
            .find(|((m, p), _)| m.matches(module) && p.matches(param))
            .map(|(_, &v)| v)
    }

    /// Last gate state of a module.
    pub fn gate(&self, module: &str) -> Option<bool> {
        self.gates
            .iter()
            .find(|(m, _)| m.matches(module))
            .map(|(_, &on)| on)
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.params.len() + self.active.len() + self.gates.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry for a module not in `modules`.
    ///
    /// Called when a patch goes live, so modules that only existed in the
    /// previous patch are not seeded into later replacements. Modules kept
    /// under the same id keep their state.
    pub fn retain_modules<'a>(&mut self, modules: impl IntoIterator<Item = &'a str>) {
        let keep: Vec<&str> = modules.into_iter().collect();
        let kept = |m: &Ident| keep.iter().any(|id| m.matches(id));
        self.params.retain(|(m, _), _| kept(m));
        self.active.retain(|m, _| kept(m));
        self.gates.retain(|m, _| kept(m));
    }

    /// Commands that bring a freshly built worker to the mirrored state.
    ///
    /// Activity flags come first, then parameters, then gates, so an
    /// envelope is triggered with its final settings in place.
    pub fn seed(&self) -> Vec<SeedCommand> {
        let active = self.active.iter().map(|(m, &on)| SeedCommand {
            module: m.as_str().to_string(),
            param: ACTIVE_PARAM.to_string(),
            kind: SeedKind::Bool,
            value: if on { 1.0 } else { 0.0 },
        });
        let params = self.params.iter().map(|((m, p), &v)| SeedCommand {
            module: m.as_str().to_string(),
            param: p.as_str().to_string(),
            kind: SeedKind::Float,
            value: v,
        });
        let gates = self.gates.iter().map(|(m, &on)| SeedCommand {
            module: m.as_str().to_string(),
            param: GATE_PARAM.to_string(),
            kind: SeedKind::Gate,
            value: if on { 1.0 } else { 0.0 },
        });
        active.chain(params).chain(gates).collect()
    }
}

//! Building a new patch for hot swap.
//!
//! A [`PatchBuilder`] edits a local [`PatchRouter`] so every edit is checked
//! as it is made: `connect` rejects a cycle immediately, `validate` reports
//! missing inputs. Alongside the router it keeps the serialisable
//! [`PatchSpec`] that is shipped to the replacement worker on commit.
//!
//! Nothing a builder does touches the running workers until
//! [`AudioSupervisor::commit_patch`](crate::AudioSupervisor::commit_patch).

use tandem_core::{
    BuildState, Connection, ModuleRegistry, ModuleSpec, PatchError, PatchMode, PatchRouter,
    PatchSpec,
};

/// Build session for a graph patch.
pub struct PatchBuilder {
    router: PatchRouter,
    registry: ModuleRegistry,
    spec: PatchSpec,
}

impl PatchBuilder {
    /// Starts an empty graph patch.
    pub fn new(sample_rate: f32, frame_len: usize) -> Self {
        Self {
            router: PatchRouter::new(sample_rate, frame_len),
            registry: ModuleRegistry::new(),
            spec: PatchSpec::graph(),
        }
    }

    /// Starts from an existing patch. Chain patches become graphs wired in
    /// list order.
    pub fn from_spec(spec: &PatchSpec, sample_rate: f32, frame_len: usize) -> Result<Self, PatchError> {
        let mut builder = Self::new(sample_rate, frame_len);
        for module in &spec.modules {
            builder.add_module(&module.id, &module.kind)?;
            for (name, &value) in &module.params {
                builder.set_param(&module.id, name, value)?;
            }
            if let Some(generator) = module.generator {
                builder.mark_generator(&module.id, generator)?;
            }
        }
        match spec.mode {
            PatchMode::Graph => {
                for conn in &spec.connections {
                    builder.connect(&conn.from, &conn.to)?;
                }
            }
            PatchMode::Chain => {
                for pair in spec.modules.windows(2) {
                    builder.connect(&pair[0].id, &pair[1].id)?;
                }
            }
        }
        Ok(builder)
    }

    /// Adds a module of a registered kind.
    pub fn add_module(&mut self, id: &str, kind: &str) -> Result<(), PatchError> {
        let module = self
            .registry
            .create(kind, self.router.sample_rate())
            .ok_or_else(|| PatchError::UnknownKind(kind.to_string()))?;
        self.router.add_module(id, module)?;
        self.spec.modules.push(ModuleSpec::new(id, kind));
        Ok(())
    }

    /// Sets an initial parameter value.
    pub fn set_param(&mut self, id: &str, name: &str, value: f32) -> Result<(), PatchError> {
        let module = self
            .router
            .module_mut(id)
            .ok_or_else(|| PatchError::UnknownModule(id.to_string()))?;
        module
            .set_param(name, value, true)
            .map_err(|source| PatchError::Param {
                module: id.to_string(),
                source,
            })?;
        if let Some(spec) = self.spec.modules.iter_mut().find(|m| m.id == id) {
            spec.params.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Overrides whether a module may run without an input.
    pub fn mark_generator(&mut self, id: &str, generator: bool) -> Result<(), PatchError> {
        self.router.set_generator(id, generator)?;
        if let Some(spec) = self.spec.modules.iter_mut().find(|m| m.id == id) {
            spec.generator = Some(generator);
        }
        Ok(())
    }

    /// Removes a module and its connections.
    pub fn remove_module(&mut self, id: &str) -> Result<(), PatchError> {
        self.router.remove_module(id)?;
        self.spec.modules.retain(|m| m.id != id);
        self.spec.connections.retain(|c| c.from != id && c.to != id);
        Ok(())
    }

    /// Connects `from` → `to`. An edge that would close a cycle is
    /// rejected and the patch is left unchanged.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), PatchError> {
        self.router.connect(from, to)?;
        self.spec.connections.push(Connection {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Removes the edge `from` → `to`.
    pub fn disconnect(&mut self, from: &str, to: &str) -> Result<(), PatchError> {
        self.router.disconnect(from, to)?;
        self.spec.connections.retain(|c| !(c.from == from && c.to == to));
        Ok(())
    }

    /// Validates the patch; returns the number of modules in execution order.
    pub fn validate(&mut self) -> Result<usize, PatchError> {
        self.router.validate().map(<[_]>::len)
    }

    /// Discards every edit.
    pub fn abort(&mut self) -> Result<(), PatchError> {
        self.router.abort()?;
        self.spec = PatchSpec::graph();
        Ok(())
    }

    /// Build-session state.
    pub fn state(&self) -> BuildState {
        self.router.state()
    }

    /// The patch as it would be committed.
    pub fn spec(&self) -> &PatchSpec {
        &self.spec
    }

    /// The local router.
    pub fn router(&self) -> &PatchRouter {
        &self.router
    }

    /// Validates and hands over the patch description.
    pub(crate) fn finish(mut self) -> Result<PatchSpec, PatchError> {
        self.router.validate()?;
        Ok(self.spec)
    }
}

impl std::fmt::Debug for PatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchBuilder")
            .field("state", &self.router.state())
            .field("modules", &self.spec.modules.len())
            .field("connections", &self.spec.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tandem_core::ModuleHost;

    use super::*;

    fn voice() -> PatchBuilder {
        let mut b = PatchBuilder::new(48000.0, 64);
        b.add_module("osc", "osc").unwrap();
        b.add_module("filt", "filter").unwrap();
        b.add_module("out", "gain").unwrap();
        b.connect("osc", "filt").unwrap();
        b.connect("filt", "out").unwrap();
        b
    }

    #[test]
    fn cycle_rejected_and_graph_unchanged() {
        let mut b = voice();
        let err = b.connect("out", "osc").unwrap_err();
        assert!(matches!(err, PatchError::CycleDetected { .. }));
        assert_eq!(b.spec().connections.len(), 2);
        assert!(!b.router().has_edge("out", "osc"));
        assert_eq!(b.validate().unwrap(), 3);
    }

    #[test]
    fn missing_input_fails_validation() {
        let mut b = PatchBuilder::new(48000.0, 64);
        b.add_module("osc", "osc").unwrap();
        b.add_module("filt", "filter").unwrap();
        assert!(matches!(b.validate(), Err(PatchError::MissingInput(id)) if id == "filt"));
        b.mark_generator("filt", true).unwrap();
        assert_eq!(b.validate().unwrap(), 2);
    }

    #[test]
    fn spec_tracks_edits_and_builds() {
        let mut b = voice();
        b.set_param("filt", "cutoff", 800.0).unwrap();
        b.disconnect("filt", "out").unwrap();
        b.remove_module("out").unwrap();
        assert_eq!(b.validate().unwrap(), 2);

        let spec = b.finish().unwrap();
        assert_eq!(spec.mode, PatchMode::Graph);
        assert_eq!(spec.modules.len(), 2);
        assert_eq!(spec.modules[1].params.get("cutoff"), Some(&800.0));

        let host = ModuleHost::from_spec(&spec, &ModuleRegistry::new(), 48000.0, 64).unwrap();
        assert_eq!(host.module("filt").unwrap().param("cutoff"), Some(800.0));
    }

    #[test]
    fn unknown_kind_and_param_rejected() {
        let mut b = PatchBuilder::new(48000.0, 64);
        assert!(matches!(
            b.add_module("x", "theremin"),
            Err(PatchError::UnknownKind(_))
        ));
        b.add_module("osc", "osc").unwrap();
        assert!(matches!(
            b.set_param("osc", "warmth", 1.0),
            Err(PatchError::Param { .. })
        ));
        assert!(b.spec().modules[0].params.is_empty());
    }

    #[test]
    fn abort_discards_everything() {
        let mut b = voice();
        b.abort().unwrap();
        assert_eq!(b.state(), BuildState::Empty);
        assert!(b.spec().modules.is_empty());
        assert!(matches!(b.finish(), Err(PatchError::EmptyGraph)));
    }

    #[test]
    fn chain_spec_becomes_graph() {
        let b = PatchBuilder::from_spec(&PatchSpec::default_voice(), 48000.0, 64).unwrap();
        assert_eq!(b.spec().mode, PatchMode::Graph);
        assert_eq!(b.spec().connections.len(), 2);
        assert!(b.router().has_edge("osc1", "env1"));
    }
}

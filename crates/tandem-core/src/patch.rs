//! Serialisable patch descriptions.
//!
//! A [`PatchSpec`] is what the supervisor ships to a worker: which modules
//! to instantiate, in what topology, with which initial parameters. Workers
//! turn it into a live [`ModuleHost`](crate::ModuleHost).
//!
//! # TOML Format
//!
//! ```toml
//! mode = "graph"
//!
//! [[modules]]
//! id = "gen"
//! kind = "osc"
//! params = { freq = 110.0 }
//!
//! [[modules]]
//! id = "filt"
//! kind = "filter"
//!
//! [[connections]]
//! from = "gen"
//! to = "filt"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a host executes its modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMode {
    /// Fixed linear order: module `i` feeds module `i + 1`.
    #[default]
    Chain,
    /// Arbitrary DAG via `PatchRouter`.
    Graph,
}

/// One module in a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Unique module identifier, addressed by commands.
    pub id: String,
    /// Registry kind.
    pub kind: String,
    /// Overrides the kind's generator flag (graph mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<bool>,
    /// Initial parameter values, applied immediately.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f32>,
}

impl ModuleSpec {
    /// Creates a module entry with default parameters.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            generator: None,
            params: BTreeMap::new(),
        }
    }

    /// Adds an initial parameter value.
    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Overrides the generator flag.
    pub fn with_generator(mut self, generator: bool) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// A directed signal connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Source module id.
    pub from: String,
    /// Destination module id.
    pub to: String,
}

/// A complete patch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Execution mode.
    #[serde(default)]
    pub mode: PatchMode,
    /// Modules, in chain order for [`PatchMode::Chain`].
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    /// Edges (graph mode only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

impl PatchSpec {
    /// Creates an empty chain patch.
    pub fn chain() -> Self {
        Self::default()
    }

    /// Creates an empty graph patch.
    pub fn graph() -> Self {
        Self {
            mode: PatchMode::Graph,
            ..Self::default()
        }
    }

    /// Appends a module.
    pub fn with_module(mut self, module: ModuleSpec) -> Self {
        self.modules.push(module);
        self
    }

    /// Appends a connection.
    pub fn with_connection(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.connections.push(Connection {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// True if a module with `id` is part of the patch.
    pub fn contains(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m.id == id)
    }

    /// The default single-voice patch: `osc1 → env1 → filt1`.
    pub fn default_voice() -> Self {
        Self::chain()
            .with_module(ModuleSpec::new("osc1", "osc"))
            .with_module(ModuleSpec::new("env1", "env"))
            .with_module(ModuleSpec::new("filt1", "filter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_graph() {
        let spec: PatchSpec = toml::from_str(
            r#"
            mode = "graph"
            [[modules]]
            id = "gen"
            kind = "osc"
            params = { freq = 110.0 }
            [[modules]]
            id = "filt"
            kind = "filter"
            generator = false
            [[connections]]
            from = "gen"
            to = "filt"
            "#,
        )
        .unwrap();
        assert_eq!(spec.mode, PatchMode::Graph);
        assert_eq!(spec.modules[0].params["freq"], 110.0);
        assert_eq!(spec.modules[1].generator, Some(false));
        assert_eq!(spec.connections.len(), 1);
    }

    #[test]
    fn json_round_trip() {
        let spec = PatchSpec::default_voice();
        let json = serde_json::to_string(&spec).unwrap();
        let back: PatchSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(back.contains("env1"));
    }
}

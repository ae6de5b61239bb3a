//! Patch router: DAG construction, validation, commit and execution.
//!
//! A [`PatchRouter`] is built up in a session that moves through
//! [`BuildState::Empty`] → [`BuildState::Building`] → [`BuildState::Validated`]
//! → [`BuildState::Committed`]. Every mutation is checked before it touches
//! the arena: an edge that would close a cycle is rejected up front, so the
//! graph is acyclic at every instant, not just after validation.
//!
//! Once committed the topology is frozen. Reconfiguring a live patch means
//! building a fresh router (in a standby worker) and swapping to it.

use std::collections::VecDeque;

use thiserror::Error;

use crate::ident::{Ident, IdentError};
use crate::module::{Module, ModuleError, render};
use crate::patch::{PatchMode, PatchSpec};
use crate::registry::ModuleRegistry;

use super::edge::{Edge, EdgeId};
use super::node::{NodeData, NodeId};
use super::schedule::{BufferPool, CompiledSchedule, ProcessStep};

/// Build-session state of a [`PatchRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// No modules.
    Empty,
    /// Modules or edges changed since the last validation.
    Building,
    /// Validated; execution order cached.
    Validated,
    /// Warmed up and frozen.
    Committed,
}

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// The module id is not a valid identifier.
    #[error("invalid module id '{id}': {source}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        #[source]
        source: IdentError,
    },
    /// A module with this id already exists.
    #[error("module '{0}' already exists")]
    DuplicateModule(String),
    /// No module with this id.
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    /// The registry has no such kind.
    #[error("unknown module kind '{0}'")]
    UnknownKind(String),
    /// The edge would close a cycle.
    #[error("connecting '{from}' -> '{to}' would create a cycle")]
    CycleDetected {
        /// Source module id.
        from: String,
        /// Destination module id.
        to: String,
    },
    /// The edge already exists.
    #[error("edge '{from}' -> '{to}' already exists")]
    DuplicateEdge {
        /// Source module id.
        from: String,
        /// Destination module id.
        to: String,
    },
    /// No such edge.
    #[error("no edge '{from}' -> '{to}'")]
    EdgeNotFound {
        /// Source module id.
        from: String,
        /// Destination module id.
        to: String,
    },
    /// A non-generator module has no inbound edge.
    #[error("module '{0}' has no input and is not a generator")]
    MissingInput(String),
    /// Nothing to validate or commit.
    #[error("graph is empty")]
    EmptyGraph,
    /// The operation is not allowed in the current state.
    #[error("operation not allowed while {0:?}")]
    InvalidState(BuildState),
    /// An initial parameter in a patch does not exist.
    #[error("module '{module}': {source}")]
    Param {
        /// Module id.
        module: String,
        /// Underlying module error.
        #[source]
        source: ModuleError,
    },
}

/// A DAG of modules with build/validate/commit semantics.
pub struct PatchRouter {
    nodes: Vec<Option<NodeData>>,
    edges: Vec<Option<Edge>>,
    next_node_slot: u32,
    next_edge_slot: u32,
    state: BuildState,
    order: Vec<NodeId>,
    schedule: Option<CompiledSchedule>,
    pool: BufferPool,
    mix: Vec<f32>,
    sample_rate: f32,
    frame_len: usize,
}

impl PatchRouter {
    /// Creates an empty router.
    pub fn new(sample_rate: f32, frame_len: usize) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_node_slot: 0,
            next_edge_slot: 0,
            state: BuildState::Empty,
            order: Vec::new(),
            schedule: None,
            pool: BufferPool::new(0, frame_len),
            mix: vec![0.0; frame_len],
            sample_rate,
            frame_len,
        }
    }

    /// Builds and validates a router from a patch description.
    ///
    /// In [`PatchMode::Chain`] the modules are connected in list order.
    /// The result is `Validated`, not committed.
    pub fn from_spec(
        spec: &PatchSpec,
        registry: &ModuleRegistry,
        sample_rate: f32,
        frame_len: usize,
    ) -> Result<Self, PatchError> {
        let mut router = Self::new(sample_rate, frame_len);
        for module_spec in &spec.modules {
            let mut module = registry
                .create(&module_spec.kind, sample_rate)
                .ok_or_else(|| PatchError::UnknownKind(module_spec.kind.clone()))?;
            for (name, &value) in &module_spec.params {
                module
                    .set_param(name, value, true)
                    .map_err(|source| PatchError::Param {
                        module: module_spec.id.clone(),
                        source,
                    })?;
            }
            router.add_module(&module_spec.id, module)?;
            if let Some(generator) = module_spec.generator {
                router.set_generator(&module_spec.id, generator)?;
            }
        }
        match spec.mode {
            PatchMode::Graph => {
                for conn in &spec.connections {
                    router.connect(&conn.from, &conn.to)?;
                }
            }
            PatchMode::Chain => {
                for pair in spec.modules.windows(2) {
                    router.connect(&pair[0].id, &pair[1].id)?;
                }
            }
        }
        router.validate()?;
        Ok(router)
    }

    // --- Mutation ---

    /// Adds a module under `id`.
    ///
    /// Fails if `id` is not a valid identifier, already exists, or the
    /// router is committed.
    pub fn add_module(&mut self, id: &str, module: Box<dyn Module>) -> Result<NodeId, PatchError> {
        self.ensure_mutable()?;
        let ident = Ident::new(id).map_err(|source| PatchError::InvalidId {
            id: id.to_string(),
            source,
        })?;
        if self.find(id).is_some() {
            return Err(PatchError::DuplicateModule(id.to_string()));
        }

        let node_id = NodeId(self.next_node_slot);
        self.next_node_slot += 1;
        let idx = node_id.0 as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        self.nodes[idx] = Some(NodeData::new(ident, module));
        self.mark_dirty();

        #[cfg(feature = "tracing")]
        tracing::debug!("patch_add: {id} as {node_id}");
        Ok(node_id)
    }

    /// Removes a module and every edge touching it.
    pub fn remove_module(&mut self, id: &str) -> Result<Box<dyn Module>, PatchError> {
        self.ensure_mutable()?;
        let node_id = self.lookup(id)?;
        let idx = node_id.0 as usize;
        let edge_ids: Vec<EdgeId> = self.nodes[idx]
            .as_ref()
            .map(|n| n.incoming.iter().chain(n.outgoing.iter()).copied().collect())
            .unwrap_or_default();
        for edge_id in edge_ids {
            self.disconnect_internal(edge_id);
        }
        let node = self.nodes[idx]
            .take()
            .ok_or_else(|| PatchError::UnknownModule(id.to_string()))?;
        self.mark_dirty();
        Ok(node.module)
    }

    /// Marks a module as a generator (allowed to have no inbound edge).
    pub fn set_generator(&mut self, id: &str, generator: bool) -> Result<(), PatchError> {
        self.ensure_mutable()?;
        let node_id = self.lookup(id)?;
        if let Some(node) = self.nodes[node_id.0 as usize].as_mut() {
            node.generator = generator;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Connects `source_id` → `dest_id`.
    ///
    /// Rejected, leaving the graph untouched, if either id is unknown, the
    /// edge exists, or `dest_id` can already reach `source_id` (the new edge
    /// would close a cycle).
    pub fn connect(&mut self, source_id: &str, dest_id: &str) -> Result<EdgeId, PatchError> {
        self.ensure_mutable()?;
        let from = self.lookup(source_id)?;
        let to = self.lookup(dest_id)?;

        if self.find_edge(from, to).is_some() {
            return Err(PatchError::DuplicateEdge {
                from: source_id.to_string(),
                to: dest_id.to_string(),
            });
        }
        if self.can_reach(to, from) {
            #[cfg(feature = "tracing")]
            tracing::debug!("patch_connect rejected: {source_id} -> {dest_id} closes a cycle");
            return Err(PatchError::CycleDetected {
                from: source_id.to_string(),
                to: dest_id.to_string(),
            });
        }

        let edge_id = EdgeId(self.next_edge_slot);
        self.next_edge_slot += 1;
        let edge_idx = edge_id.0 as usize;
        if edge_idx >= self.edges.len() {
            self.edges.resize_with(edge_idx + 1, || None);
        }
        self.edges[edge_idx] = Some(Edge { from, to });
        if let Some(node) = self.nodes[from.0 as usize].as_mut() {
            node.outgoing.push(edge_id);
        }
        if let Some(node) = self.nodes[to.0 as usize].as_mut() {
            node.incoming.push(edge_id);
        }
        self.mark_dirty();

        #[cfg(feature = "tracing")]
        tracing::debug!("patch_connect: {source_id} -> {dest_id}");
        Ok(edge_id)
    }

    /// Removes the edge `source_id` → `dest_id`.
    pub fn disconnect(&mut self, source_id: &str, dest_id: &str) -> Result<(), PatchError> {
        self.ensure_mutable()?;
        let from = self.lookup(source_id)?;
        let to = self.lookup(dest_id)?;
        let edge_id = self
            .find_edge(from, to)
            .ok_or_else(|| PatchError::EdgeNotFound {
                from: source_id.to_string(),
                to: dest_id.to_string(),
            })?;
        self.disconnect_internal(edge_id);
        self.mark_dirty();
        Ok(())
    }

    // --- Validation and commit ---

    /// Validates the graph and caches its execution order.
    ///
    /// Checks acyclicity and that every non-generator has an inbound edge.
    pub fn validate(&mut self) -> Result<&[NodeId], PatchError> {
        match self.state {
            BuildState::Committed => return Err(PatchError::InvalidState(self.state)),
            BuildState::Empty => return Err(PatchError::EmptyGraph),
            BuildState::Building | BuildState::Validated => {}
        }

        let sorted = self.kahn_sort()?;
        for &idx in &sorted {
            if let Some(node) = &self.nodes[idx]
                && node.incoming.is_empty()
                && !node.generator
            {
                return Err(PatchError::MissingInput(node.id.as_str().to_string()));
            }
        }

        let schedule = self.compile(&sorted);
        self.pool.ensure(schedule.buffer_count);
        self.order = sorted.iter().map(|&i| NodeId(i as u32)).collect();
        self.schedule = Some(schedule);
        self.state = BuildState::Validated;

        #[cfg(feature = "tracing")]
        tracing::debug!(nodes = self.order.len(), "patch_validate: ok");
        Ok(&self.order)
    }

    /// Validates if needed, runs `warmup_ticks` silent ticks to prime
    /// smoothing and filter history, and freezes the topology.
    pub fn commit(&mut self, warmup_ticks: usize) -> Result<(), PatchError> {
        match self.state {
            BuildState::Committed => return Err(PatchError::InvalidState(self.state)),
            BuildState::Empty => return Err(PatchError::EmptyGraph),
            BuildState::Building => {
                self.validate()?;
            }
            BuildState::Validated => {}
        }
        let mut scratch = vec![0.0; self.frame_len];
        for _ in 0..warmup_ticks {
            self.run(&mut scratch);
        }
        self.state = BuildState::Committed;

        #[cfg(feature = "tracing")]
        tracing::debug!(warmup_ticks, "patch_commit");
        Ok(())
    }

    /// Discards every pending edit and returns to `Empty`.
    ///
    /// A committed router is live and cannot be aborted.
    pub fn abort(&mut self) -> Result<(), PatchError> {
        if self.state == BuildState::Committed {
            return Err(PatchError::InvalidState(self.state));
        }
        self.nodes.clear();
        self.edges.clear();
        self.order.clear();
        self.schedule = None;
        self.state = BuildState::Empty;
        Ok(())
    }

    // --- Execution ---

    /// Renders one frame into `out`.
    ///
    /// Returns `false` and writes silence unless the router is validated or
    /// committed. Allocation-free.
    pub fn process(&mut self, out: &mut [f32]) -> bool {
        if !self.is_runnable() {
            out.fill(0.0);
            return false;
        }
        self.run(out);
        true
    }

    fn run(&mut self, out: &mut [f32]) {
        if let Some(schedule) = &self.schedule {
            Self::run_schedule(&mut self.nodes, schedule, &mut self.pool, &mut self.mix, out);
        }
    }

    /// Executes a compiled schedule. Static so the borrows of nodes, pool
    /// and mix bus stay disjoint.
    fn run_schedule(
        nodes: &mut [Option<NodeData>],
        schedule: &CompiledSchedule,
        pool: &mut BufferPool,
        mix: &mut [f32],
        out: &mut [f32],
    ) {
        out.fill(0.0);
        for step in &schedule.steps {
            match step {
                ProcessStep::Generate {
                    node_idx,
                    output_buf,
                } => {
                    if let Some(Some(node)) = nodes.get_mut(*node_idx) {
                        render(node.module.as_mut(), None, pool.get_mut(*output_buf));
                    }
                }
                ProcessStep::Process {
                    node_idx,
                    input_buf,
                    output_buf,
                } => {
                    if let Some(Some(node)) = nodes.get_mut(*node_idx) {
                        let (input, output) = pool.get_ref_and_mut(*input_buf, *output_buf);
                        render(node.module.as_mut(), Some(input), output);
                    }
                }
                ProcessStep::ProcessMixed {
                    node_idx,
                    sources,
                    output_buf,
                } => {
                    mix.fill(0.0);
                    for &src in &schedule.sources[sources.clone()] {
                        for (m, s) in mix.iter_mut().zip(pool.get(src)) {
                            *m += *s;
                        }
                    }
                    if let Some(Some(node)) = nodes.get_mut(*node_idx) {
                        render(node.module.as_mut(), Some(mix), pool.get_mut(*output_buf));
                    }
                }
                ProcessStep::AccumulateOutput { buffer_idx } => {
                    for (o, s) in out.iter_mut().zip(pool.get(*buffer_idx)) {
                        *o += *s;
                    }
                }
            }
        }
    }

    // --- Accessors ---

    /// Current build state.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// True once validated or committed.
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, BuildState::Validated | BuildState::Committed)
    }

    /// Cached topological order (empty until validated).
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Compiled schedule, if validated.
    pub fn schedule(&self) -> Option<&CompiledSchedule> {
        self.schedule.as_ref()
    }

    /// Number of modules.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    /// Frame length in samples.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Handle of the module called `id`.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(i, n)| {
            n.as_ref()
                .filter(|n| n.id.matches(id))
                .map(|_| NodeId(i as u32))
        })
    }

    /// True if the edge `source_id` → `dest_id` exists.
    pub fn has_edge(&self, source_id: &str, dest_id: &str) -> bool {
        match (self.find(source_id), self.find(dest_id)) {
            (Some(from), Some(to)) => self.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Module ids in arena order.
    pub fn module_ids(&self) -> impl Iterator<Item = &Ident> {
        self.nodes.iter().flatten().map(|n| &n.id)
    }

    /// Immutable access to a module.
    pub fn module(&self, id: &str) -> Option<&dyn Module> {
        let node = self.nodes.iter().flatten().find(|n| n.id.matches(id))?;
        Some(node.module.as_ref())
    }

    /// Mutable access to a module.
    pub fn module_mut(&mut self, id: &str) -> Option<&mut dyn Module> {
        let node = self.nodes.iter_mut().flatten().find(|n| n.id.matches(id))?;
        Some(node.module.as_mut())
    }

    /// Mutable access by identifier; allocation-free, used on the audio path.
    pub fn module_by_ident_mut(&mut self, id: &Ident) -> Option<&mut dyn Module> {
        let node = self.nodes.iter_mut().flatten().find(|n| n.id == *id)?;
        Some(node.module.as_mut())
    }

    /// Visits every module in arena order.
    pub fn for_each_module(&self, mut f: impl FnMut(&Ident, &dyn Module)) {
        for node in self.nodes.iter().flatten() {
            f(&node.id, node.module.as_ref());
        }
    }

    /// Updates every module's sample rate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for node in self.nodes.iter_mut().flatten() {
            node.module.set_sample_rate(sample_rate);
        }
    }

    /// Clears every module's history.
    pub fn reset(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.module.reset();
        }
        self.pool.clear_all();
    }

    // --- Kahn's topological sort ---

    /// Kahn's algorithm; ties resolve in insertion order.
    fn kahn_sort(&self) -> Result<Vec<usize>, PatchError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut active_count = 0usize;

        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                active_count += 1;
                in_degree[i] = node
                    .incoming
                    .iter()
                    .filter(|e| self.edges[e.0 as usize].is_some())
                    .count() as u32;
            }
        }
        if active_count == 0 {
            return Err(PatchError::EmptyGraph);
        }

        let mut queue: VecDeque<usize> = (0..n)
            .filter(|&i| self.nodes[i].is_some() && in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(active_count);

        while let Some(idx) = queue.pop_front() {
            sorted.push(idx);
            let Some(node) = &self.nodes[idx] else {
                continue;
            };
            for edge_id in &node.outgoing {
                if let Some(edge) = &self.edges[edge_id.0 as usize] {
                    let to_idx = edge.to.0 as usize;
                    in_degree[to_idx] -= 1;
                    if in_degree[to_idx] == 0 {
                        queue.push_back(to_idx);
                    }
                }
            }
        }

        if sorted.len() != active_count {
            // Unreachable while connect() rejects cycles up front.
            let culprit = (0..n)
                .find(|&i| self.nodes[i].is_some() && !sorted.contains(&i))
                .and_then(|i| self.nodes[i].as_ref())
                .map(|node| node.id.as_str().to_string())
                .unwrap_or_default();
            return Err(PatchError::CycleDetected {
                from: culprit.clone(),
                to: culprit,
            });
        }
        Ok(sorted)
    }

    // --- Schedule compilation ---

    fn compile(&self, sorted: &[usize]) -> CompiledSchedule {
        let mut buf_of = vec![usize::MAX; self.nodes.len()];
        let mut schedule = CompiledSchedule {
            buffer_count: sorted.len(),
            ..CompiledSchedule::default()
        };

        for (slot, &idx) in sorted.iter().enumerate() {
            buf_of[idx] = slot;
            let Some(node) = &self.nodes[idx] else {
                continue;
            };
            let inputs: Vec<usize> = node
                .incoming
                .iter()
                .filter_map(|e| self.edges[e.0 as usize].as_ref())
                .map(|edge| buf_of[edge.from.0 as usize])
                .collect();
            let step = match inputs.as_slice() {
                [] => ProcessStep::Generate {
                    node_idx: idx,
                    output_buf: slot,
                },
                [input] => ProcessStep::Process {
                    node_idx: idx,
                    input_buf: *input,
                    output_buf: slot,
                },
                many => {
                    let start = schedule.sources.len();
                    schedule.sources.extend_from_slice(many);
                    ProcessStep::ProcessMixed {
                        node_idx: idx,
                        sources: start..schedule.sources.len(),
                        output_buf: slot,
                    }
                }
            };
            schedule.steps.push(step);
        }

        for &idx in sorted {
            if let Some(node) = &self.nodes[idx]
                && node.outgoing.is_empty()
            {
                schedule.steps.push(ProcessStep::AccumulateOutput {
                    buffer_idx: buf_of[idx],
                });
            }
        }
        schedule
    }

    // --- Internal helpers ---

    fn ensure_mutable(&self) -> Result<(), PatchError> {
        if self.state == BuildState::Committed {
            Err(PatchError::InvalidState(self.state))
        } else {
            Ok(())
        }
    }

    fn mark_dirty(&mut self) {
        self.schedule = None;
        self.order.clear();
        self.state = if self.node_count() == 0 {
            BuildState::Empty
        } else {
            BuildState::Building
        };
    }

    fn lookup(&self, id: &str) -> Result<NodeId, PatchError> {
        self.find(id)
            .ok_or_else(|| PatchError::UnknownModule(id.to_string()))
    }

    /// DFS reachability: can `from` reach `to` via existing edges?
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            let idx = current.0 as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;
            if let Some(Some(node)) = self.nodes.get(idx) {
                for edge_id in &node.outgoing {
                    if let Some(edge) = &self.edges[edge_id.0 as usize] {
                        stack.push(edge.to);
                    }
                }
            }
        }
        false
    }

    fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        let node = self.nodes.get(from.0 as usize)?.as_ref()?;
        node.outgoing.iter().copied().find(|edge_id| {
            self.edges[edge_id.0 as usize]
                .as_ref()
                .is_some_and(|edge| edge.to == to)
        })
    }

    fn disconnect_internal(&mut self, id: EdgeId) {
        let idx = id.0 as usize;
        if let Some(edge) = self.edges[idx].take() {
            if let Some(Some(node)) = self.nodes.get_mut(edge.from.0 as usize) {
                node.outgoing.retain(|e| *e != id);
            }
            if let Some(Some(node)) = self.nodes.get_mut(edge.to.0 as usize) {
                node.incoming.retain(|e| *e != id);
            }
        }
    }
}

impl core::fmt::Debug for PatchRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PatchRouter")
            .field("state", &self.state)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish_non_exhaustive()
    }
}

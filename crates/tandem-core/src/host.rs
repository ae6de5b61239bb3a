//! Module host: one worker's complete processing surface.
//!
//! A [`ModuleHost`] owns a set of modules, either as a fixed linear chain or
//! as a committed [`PatchRouter`] graph, and runs one *tick* at a time:
//! drain every pending command, then render one frame.
//!
//! Commands are applied between buffers, never inside one, so everything
//! broadcast together lands on the same buffer boundary. Malformed records
//! and commands for unknown modules are counted and dropped; nothing a
//! control surface sends can stop the host.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::command::{ACTIVE_PARAM, Command, CommandSource, Op, ValueType};
use crate::graph::{PatchError, PatchRouter};
use crate::ident::Ident;
use crate::module::{Module, ModuleState, render};
use crate::patch::{PatchMode, PatchSpec};
use crate::registry::ModuleRegistry;

/// Errors from host construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The patch could not be built.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// Frame length must be non-zero.
    #[error("frame length must be greater than zero")]
    ZeroFrameLen,
    /// The router has not been validated.
    #[error("router is not validated")]
    NotRunnable,
}

/// What happened to one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Applied to its module.
    Applied,
    /// Decoding failed; the record was dropped.
    Rejected,
    /// No module with that id; dropped.
    UnknownModule,
    /// The module has no such parameter; dropped.
    UnknownParam,
}

struct Chain {
    modules: Vec<(Ident, Box<dyn Module>)>,
    scratch: (Vec<f32>, Vec<f32>),
}

enum Topology {
    Chain(Chain),
    Graph(PatchRouter),
}

/// Runs a chain or graph of modules one tick at a time.
pub struct ModuleHost {
    topology: Topology,
    sample_rate: f32,
    frame_len: usize,
    buffers_processed: u64,
    commands_processed: u64,
    commands_rejected: u64,
    commands_dropped: u64,
}

impl ModuleHost {
    /// Creates an empty linear chain.
    pub fn chain(sample_rate: f32, frame_len: usize) -> Result<Self, HostError> {
        if frame_len == 0 {
            return Err(HostError::ZeroFrameLen);
        }
        Ok(Self::with_topology(
            Topology::Chain(Chain {
                modules: Vec::new(),
                scratch: (vec![0.0; frame_len], vec![0.0; frame_len]),
            }),
            sample_rate,
            frame_len,
        ))
    }

    /// Wraps a validated or committed router.
    pub fn graph(router: PatchRouter) -> Result<Self, HostError> {
        if !router.is_runnable() {
            return Err(HostError::NotRunnable);
        }
        let sample_rate = router.sample_rate();
        let frame_len = router.frame_len();
        if frame_len == 0 {
            return Err(HostError::ZeroFrameLen);
        }
        Ok(Self::with_topology(
            Topology::Graph(router),
            sample_rate,
            frame_len,
        ))
    }

    /// Builds a host from a patch description.
    pub fn from_spec(
        spec: &PatchSpec,
        registry: &ModuleRegistry,
        sample_rate: f32,
        frame_len: usize,
    ) -> Result<Self, HostError> {
        match spec.mode {
            PatchMode::Graph => {
                let router = PatchRouter::from_spec(spec, registry, sample_rate, frame_len)?;
                Self::graph(router)
            }
            PatchMode::Chain => {
                let mut host = Self::chain(sample_rate, frame_len)?;
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
                    host.push(&module_spec.id, module)?;
                }
                Ok(host)
            }
        }
    }

    fn with_topology(topology: Topology, sample_rate: f32, frame_len: usize) -> Self {
        Self {
            topology,
            sample_rate,
            frame_len,
            buffers_processed: 0,
            commands_processed: 0,
            commands_rejected: 0,
            commands_dropped: 0,
        }
    }

    /// Appends a module to a chain host.
    ///
    /// Graph hosts are frozen; build a new router instead.
    pub fn push(&mut self, id: &str, module: Box<dyn Module>) -> Result<(), HostError> {
        let Topology::Chain(chain) = &mut self.topology else {
            return Err(PatchError::InvalidState(crate::graph::BuildState::Committed).into());
        };
        let ident = Ident::new(id).map_err(|source| PatchError::InvalidId {
            id: id.to_string(),
            source,
        })?;
        if chain.modules.iter().any(|(existing, _)| *existing == ident) {
            return Err(PatchError::DuplicateModule(id.to_string()).into());
        }
        chain.modules.push((ident, module));
        Ok(())
    }

    // --- Commands ---

    /// Decodes and applies one record.
    pub fn apply_record(&mut self, record: &[u8; crate::COMMAND_SIZE]) -> CommandOutcome {
        match Command::decode(record) {
            Ok(cmd) => self.apply(&cmd),
            Err(_err) => {
                self.commands_rejected += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "command rejected");
                CommandOutcome::Rejected
            }
        }
    }

    /// Applies one decoded command.
    ///
    /// `GATE` triggers or releases; `SET active` toggles bypass; any other
    /// `SET` goes to the module's parameter. Allocation-free on success.
    pub fn apply(&mut self, cmd: &Command) -> CommandOutcome {
        let Some(module) = self.find_mut(&cmd.module_id) else {
            self.commands_dropped += 1;
            #[cfg(feature = "tracing")]
            tracing::warn!(module = %cmd.module_id, "command for unknown module dropped");
            return CommandOutcome::UnknownModule;
        };

        let outcome = match (cmd.op, cmd.value_type) {
            (Op::Gate, _) => {
                module.gate(cmd.as_bool());
                CommandOutcome::Applied
            }
            (Op::Set, ValueType::Bool) if cmd.param_id.matches(ACTIVE_PARAM) => {
                module.set_active(cmd.as_bool());
                CommandOutcome::Applied
            }
            (Op::Set, _) => {
                // Unknown names are counted, not turned into errors: no heap.
                match module.core().params.index_of(cmd.param_id.as_str()) {
                    Some(idx) => {
                        module.set_param_at(idx, cmd.value as f32, cmd.immediate);
                        CommandOutcome::Applied
                    }
                    None => CommandOutcome::UnknownParam,
                }
            }
        };

        match outcome {
            CommandOutcome::Applied => self.commands_processed += 1,
            _ => {
                self.commands_dropped += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    module = %cmd.module_id,
                    param = %cmd.param_id,
                    "command for unknown parameter dropped"
                );
            }
        }
        outcome
    }

    /// Drains every pending record from `commands`. Returns how many were read.
    pub fn drain<S: CommandSource + ?Sized>(&mut self, commands: &mut S) -> usize {
        let mut drained = 0;
        while let Some(record) = commands.next_record() {
            self.apply_record(&record);
            drained += 1;
        }
        drained
    }

    // --- Processing ---

    /// One full tick: drain commands, then render one frame into `out`.
    pub fn tick<S: CommandSource + ?Sized>(&mut self, commands: &mut S, out: &mut [f32]) -> usize {
        let drained = self.drain(commands);
        self.process(out);
        drained
    }

    /// Renders one frame into `out` without touching commands.
    ///
    /// `out` should be `frame_len` samples; extra samples are zeroed.
    /// Allocation-free.
    pub fn process(&mut self, out: &mut [f32]) {
        match &mut self.topology {
            Topology::Chain(chain) => Self::run_chain(chain, out),
            Topology::Graph(router) => {
                router.process(out);
            }
        }
        self.buffers_processed += 1;
    }

    fn run_chain(chain: &mut Chain, out: &mut [f32]) {
        if chain.modules.is_empty() {
            out.fill(0.0);
            return;
        }
        let (a, b) = (&mut chain.scratch.0, &mut chain.scratch.1);
        // `latest_in_a` tracks which scratch buffer holds the previous output.
        let mut latest_in_a = false;
        let mut has_input = false;
        for (_, module) in &mut chain.modules {
            let (input, output) = if latest_in_a {
                (&a[..], &mut b[..])
            } else {
                (&b[..], &mut a[..])
            };
            render(module.as_mut(), has_input.then_some(input), output);
            has_input = true;
            latest_in_a = !latest_in_a;
        }
        let result = if latest_in_a { &a[..] } else { &b[..] };
        let n = out.len().min(result.len());
        out[..n].copy_from_slice(&result[..n]);
        out[n..].fill(0.0);
    }

    /// Runs `ticks` frames into a scratch buffer to prime smoothing and
    /// filter history. Does not count toward `buffers_processed`.
    pub fn warm_up(&mut self, ticks: usize) {
        let mut scratch = vec![0.0; self.frame_len];
        for _ in 0..ticks {
            self.process(&mut scratch);
            self.buffers_processed -= 1;
        }
    }

    /// Makes the host live: warms up for `warmup_ticks` frames and, in graph
    /// mode, commits the router so its topology can no longer change.
    ///
    /// A host whose router is already committed only warms up.
    pub fn commit(&mut self, warmup_ticks: usize) -> Result<(), HostError> {
        match &mut self.topology {
            Topology::Graph(router) if router.state() != crate::graph::BuildState::Committed => {
                router.commit(warmup_ticks)?;
            }
            _ => self.warm_up(warmup_ticks),
        }
        Ok(())
    }

    // --- Inspection ---

    /// Execution mode.
    pub fn mode(&self) -> PatchMode {
        match self.topology {
            Topology::Chain(_) => PatchMode::Chain,
            Topology::Graph(_) => PatchMode::Graph,
        }
    }

    /// The router, in graph mode.
    pub fn router(&self) -> Option<&PatchRouter> {
        match &self.topology {
            Topology::Graph(router) => Some(router),
            Topology::Chain(_) => None,
        }
    }

    /// Frame length in samples.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn buffers_processed(&self) -> u64 {
        self.buffers_processed
    }

    /// Commands applied so far.
    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    /// Records that failed to decode.
    pub fn commands_rejected(&self) -> u64 {
        self.commands_rejected
    }

    /// Valid commands dropped for naming an unknown module or parameter.
    pub fn commands_dropped(&self) -> u64 {
        self.commands_dropped
    }

    /// Number of modules.
    pub fn module_count(&self) -> usize {
        match &self.topology {
            Topology::Chain(chain) => chain.modules.len(),
            Topology::Graph(router) => router.node_count(),
        }
    }

    /// Immutable access to a module.
    pub fn module(&self, id: &str) -> Option<&dyn Module> {
        match &self.topology {
            Topology::Chain(chain) => chain
                .modules
                .iter()
                .find(|(ident, _)| ident.matches(id))
                .map(|(_, m)| m.as_ref()),
            Topology::Graph(router) => router.module(id),
        }
    }

    /// Mutable access to a module.
    pub fn module_mut(&mut self, id: &str) -> Option<&mut dyn Module> {
        let ident = Ident::new(id).ok()?;
        self.find_mut(&ident)
    }

    fn find_mut(&mut self, id: &Ident) -> Option<&mut dyn Module> {
        match &mut self.topology {
            Topology::Chain(chain) => {
                let (_, module) = chain.modules.iter_mut().find(|(ident, _)| ident == id)?;
                Some(module.as_mut())
            }
            Topology::Graph(router) => router.module_by_ident_mut(id),
        }
    }

    /// Visits every module in execution-independent order.
    pub fn for_each_module(&self, mut f: impl FnMut(&Ident, &dyn Module)) {
        match &self.topology {
            Topology::Chain(chain) => {
                for (id, module) in &chain.modules {
                    f(id, module.as_ref());
                }
            }
            Topology::Graph(router) => router.for_each_module(f),
        }
    }

    /// Visits `(module, param, current, target)` for every parameter.
    /// Allocation-free.
    pub fn for_each_param(&self, mut f: impl FnMut(&Ident, &Ident, f32, f32)) {
        self.for_each_module(|module_id, module| {
            module
                .core()
                .params
                .for_each(|param_id, current, target| f(module_id, param_id, current, target));
        });
    }

    /// Snapshot of one module.
    pub fn get_state(&self, id: &str) -> Option<ModuleState> {
        self.module(id).map(|m| m.get_state())
    }

    /// Snapshot of every module, keyed by id.
    pub fn snapshot(&self) -> BTreeMap<String, ModuleState> {
        let mut out = BTreeMap::new();
        self.for_each_module(|id, module| {
            out.insert(id.as_str().to_string(), module.get_state());
        });
        out
    }

    /// Updates every module's sample rate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        match &mut self.topology {
            Topology::Chain(chain) => {
                for (_, module) in &mut chain.modules {
                    module.set_sample_rate(sample_rate);
                }
            }
            Topology::Graph(router) => router.set_sample_rate(sample_rate),
        }
    }

    /// Clears module history and counters.
    pub fn reset(&mut self) {
        match &mut self.topology {
            Topology::Chain(chain) => {
                for (_, module) in &mut chain.modules {
                    module.reset();
                }
            }
            Topology::Graph(router) => router.reset(),
        }
        self.buffers_processed = 0;
        self.commands_processed = 0;
        self.commands_rejected = 0;
        self.commands_dropped = 0;
    }
}

impl core::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("mode", &self.mode())
            .field("modules", &self.module_count())
            .field("frame_len", &self.frame_len)
            .field("buffers_processed", &self.buffers_processed)
            .field("commands_processed", &self.commands_processed)
            .finish_non_exhaustive()
    }
}

//! Tandem Core - modules, commands and patch graphs
//!
//! Everything a worker needs to turn a stream of control commands into audio
//! frames, with no knowledge of processes or shared memory.
//!
//! # Core Abstractions
//!
//! ## Command Protocol
//!
//! - [`Command`] - Decoded, validated control message
//! - [`pack`] / [`unpack`] - 64-byte v2 wire records
//! - [`Ident`] - Fixed-width ASCII identifier (module and parameter ids)
//! - [`CommandSource`] - Anything a host can drain records from
//!
//! ## Modules
//!
//! - [`Module`] - Object-safe module contract (`set_param`, `gate`, `process`, state)
//! - [`ParamSet`] / [`SmoothedParam`] - Per-parameter smoothing policies
//! - [`ModuleRegistry`] - Kind name to constructor
//! - [`modules`] - Built-in oscillator, envelope, filter and gain
//!
//! ## Execution
//!
//! - [`PatchSpec`] - Serialisable patch description
//! - [`PatchRouter`] - DAG build session with cycle rejection and commit
//! - [`ModuleHost`] - Drains commands and renders one frame per tick
//!
//! # Real-time Rules
//!
//! [`ModuleHost::tick`] and [`Module::process`] never allocate, block or
//! perform I/O once a patch is built. Allocation happens at construction,
//! validation and snapshot time only.
//!
//! # Example
//!
//! ```rust
//! use std::collections::VecDeque;
//! use tandem_core::{Command, ModuleHost, ModuleRegistry, PatchSpec};
//!
//! let mut host = ModuleHost::from_spec(&PatchSpec::default_voice(), &ModuleRegistry::new(), 48000.0, 256).unwrap();
//! let mut pending = VecDeque::new();
//! pending.push_back(Command::set("osc1", "freq", 440.0).unwrap().with_immediate(true).encode().unwrap());
//!
//! let mut frame = vec![0.0f32; 256];
//! host.tick(&mut pending, &mut frame);
//! assert_eq!(host.module("osc1").unwrap().param("freq"), Some(440.0));
//! ```

pub mod command;
pub mod graph;
pub mod host;
pub mod ident;
pub mod module;
pub mod modules;
pub mod param;
pub mod patch;
pub mod registry;

pub use command::{
    ACTIVE_PARAM, COMMAND_SIZE, COMMAND_VERSION, Command, CommandError, CommandSource,
    GATE_PARAM, IdField, Op, ValueType, pack, unpack,
};
pub use graph::{BuildState, EdgeId, NodeId, PatchError, PatchRouter};
pub use host::{CommandOutcome, HostError, ModuleHost};
pub use ident::{IDENT_LEN, Ident, IdentError};
pub use module::{Module, ModuleCore, ModuleError, ModuleState};
pub use param::{ParamSet, ParamSpec, ParamState, SmoothedParam, Smoothing};
pub use patch::{Connection, ModuleSpec, PatchMode, PatchSpec};
pub use registry::{ModuleDescriptor, ModuleFactory, ModuleRegistry};

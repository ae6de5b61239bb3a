//! Arena-based patch graph.
//!
//! Modules live in a `Vec<Option<NodeData>>` arena addressed by [`NodeId`];
//! edges are `(from, to)` handle pairs addressed by [`EdgeId`]. There are no
//! owning references between nodes, so cycle detection is a reachability
//! scan over indices.
//!
//! See [`PatchRouter`] for the build session and execution model.

mod edge;
mod node;
mod router;
mod schedule;

pub use edge::EdgeId;
pub use node::NodeId;
pub use router::{BuildState, PatchError, PatchRouter};
pub use schedule::{CompiledSchedule, ProcessStep};

//! Graph node types for the patch router.
//!
//! Each node owns one module and its adjacency lists. Nodes live in an
//! arena indexed by [`NodeId`]; edges refer to nodes by handle, never by
//! pointer, so there are no ownership cycles.

use crate::ident::Ident;
use crate::module::Module;

use super::edge::EdgeId;

/// Handle of a node in the patch graph.
///
/// Assigned sequentially and never reused within one router instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw arena index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Internal bookkeeping for a node.
pub(crate) struct NodeData {
    pub id: Ident,
    pub module: Box<dyn Module>,
    /// Edges arriving at this node.
    pub incoming: Vec<EdgeId>,
    /// Edges leaving this node.
    pub outgoing: Vec<EdgeId>,
    /// Allowed to have no inbound edge.
    pub generator: bool,
}

impl NodeData {
    pub fn new(id: Ident, module: Box<dyn Module>) -> Self {
        let generator = module.is_generator();
        Self {
            id,
            module,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            generator,
        }
    }
}

//! Graph edge types for the patch router.

use super::node::NodeId;

/// Handle of an edge in the patch graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    /// Returns the raw arena index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A directed signal connection.
pub(crate) struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

//! Capability Node Store
//!
//! Fixed-capacity table of capability nodes. A node is addressed by a
//! [`NodeRef`], its index in the table, which stays valid until the whole
//! store is reset. Nodes are never removed individually.
//!
//! # Design
//! - Append-only array of at most `KCAPABILITY_MAX_NODES` nodes
//! - `NodeRef` is a newtype so arbitrary integers can't address a node
//! - Lookup by id is a linear scan returning the first match

use heapless::Vec;

use super::edge::Adjacency;
use super::rights::{CapId, RightsMask, SecurityLevel};
use crate::config::KCAPABILITY_MAX_NODES;

/// Stable reference to a node in a [`NodeStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeRef(pub(super) u16);

impl NodeRef {
    /// Build a reference from a table index.
    ///
    /// Returns None if the index is out of range for any store.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < KCAPABILITY_MAX_NODES {
            Some(Self(index as u16))
        } else {
            None
        }
    }

    /// Get the table index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A capability in the derivation graph.
#[derive(Clone, Debug)]
pub struct CapabilityNode {
    /// Caller-assigned identifier.
    pub id: CapId,
    /// Rights this capability grants.
    pub rights_mask: RightsMask,
    /// Security level of this capability.
    pub security_level: SecurityLevel,
    /// Outgoing derivation edges, in insertion order.
    pub(super) adjacency: Adjacency,
}

impl CapabilityNode {
    fn new(id: CapId, rights_mask: RightsMask, security_level: SecurityLevel) -> Self {
        Self {
            id,
            rights_mask,
            security_level,
            adjacency: Adjacency::EMPTY,
        }
    }

    /// Number of capabilities derived directly from this one.
    #[inline]
    pub fn out_degree(&self) -> usize {
        self.adjacency.len()
    }
}

/// Fixed-capacity node table.
#[derive(Debug)]
pub struct NodeStore {
    nodes: Vec<CapabilityNode, KCAPABILITY_MAX_NODES>,
}

impl NodeStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Append a node.
    ///
    /// Returns None once the table is full.
    pub fn insert(
        &mut self,
        id: CapId,
        rights_mask: RightsMask,
        security_level: SecurityLevel,
    ) -> Option<NodeRef> {
        let slot = NodeRef::new(self.nodes.len())?;
        self.nodes
            .push(CapabilityNode::new(id, rights_mask, security_level))
            .ok()?;
        Some(slot)
    }

    /// Find the first node with the given id.
    pub fn find(&self, id: CapId) -> Option<NodeRef> {
        self.nodes
            .iter()
            .position(|n| n.id == id)
            .and_then(NodeRef::new)
    }

    /// Look up a node by reference.
    #[inline]
    pub fn get(&self, node: NodeRef) -> Option<&CapabilityNode> {
        self.nodes.get(node.index())
    }

    /// Look up a node by reference for modification.
    #[inline]
    pub fn get_mut(&mut self, node: NodeRef) -> Option<&mut CapabilityNode> {
        self.nodes.get_mut(node.index())
    }

    /// Check that a reference points into the populated part of the table.
    #[inline]
    pub fn contains(&self, node: NodeRef) -> bool {
        node.index() < self.nodes.len()
    }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the table holds no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if another node can be inserted.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.nodes.is_full()
    }

    /// Iterate over nodes with their references.
    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &CapabilityNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeRef(i as u16), n))
    }

    /// Drop every node. All outstanding references become invalid.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

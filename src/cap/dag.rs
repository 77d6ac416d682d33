//! Capability Derivation DAG
//!
//! Directed acyclic graph of capability nodes. An edge `parent → child`
//! records that `child` was derived from `parent`, and is only admitted if:
//!
//! 1. `parent != child`
//! 2. `child.rights ⊆ parent.rights`
//! 3. `child.level ≥ parent.level`
//! 4. `parent` is not reachable from `child` (no cycle)
//!
//! Checks run in that order; the first failure is reported.
//!
//! # Traversal
//! Every search is iterative with an explicit stack and a visited bitmap
//! sized to the node table, so stack depth and termination don't depend on
//! graph shape.

use core::cell::Cell;
use core::fmt;

use heapless::Vec;

use super::edge::{EdgeMeta, EdgePool};
use super::node::{CapabilityNode, NodeRef, NodeStore};
use super::rights::{CapId, RightsMask, SecurityLevel};
use crate::config::{KCAPABILITY_EDGE_POOL, KCAPABILITY_MAX_NODES};

/// Status code for a successful DAG operation.
pub const KCAP_SUCCESS: i32 = 0;
/// Edge pool exhausted.
pub const KCAP_ALLOC_FAILURE: i32 = -1;
/// Node reference does not name a live node.
pub const KCAP_NODE_NOT_FOUND: i32 = -3;
/// Edge would close a cycle.
pub const KCAP_CYCLE_DETECTED: i32 = -5;
/// Child rights are not a subset of parent rights.
pub const KCAP_RIGHTS_VIOLATION: i32 = -6;
/// Child security level below parent level.
pub const KCAP_SECURITY_VIOLATION: i32 = -7;
/// Edge from a node to itself.
pub const KCAP_SELF_REFERENCE: i32 = -10;
/// No such edge.
pub const KCAP_EDGE_NOT_FOUND: i32 = -12;

/// Reasons a DAG mutation is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagError {
    /// Parent and child are the same node.
    SelfReference,
    /// Parent is reachable from child.
    CycleDetected,
    /// Child rights exceed parent rights.
    RightsViolation,
    /// Child security level is below parent level.
    SecurityViolation,
    /// No adjacency entry left in the edge pool.
    PoolExhausted,
    /// A node reference is not part of this DAG.
    NodeNotFound,
    /// `remove_edge` found no such edge.
    EdgeNotFound,
}

impl DagError {
    /// `KCAP_*` status code for this error.
    pub const fn status_code(self) -> i32 {
        match self {
            Self::SelfReference => KCAP_SELF_REFERENCE,
            Self::CycleDetected => KCAP_CYCLE_DETECTED,
            Self::RightsViolation => KCAP_RIGHTS_VIOLATION,
            Self::SecurityViolation => KCAP_SECURITY_VIOLATION,
            Self::PoolExhausted => KCAP_ALLOC_FAILURE,
            Self::NodeNotFound => KCAP_NODE_NOT_FOUND,
            Self::EdgeNotFound => KCAP_EDGE_NOT_FOUND,
        }
    }
}

impl fmt::Display for DagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfReference => write!(f, "self-referencing edge"),
            Self::CycleDetected => write!(f, "edge would create a cycle"),
            Self::RightsViolation => write!(f, "child rights exceed parent rights"),
            Self::SecurityViolation => write!(f, "child security level below parent"),
            Self::PoolExhausted => write!(f, "edge pool exhausted"),
            Self::NodeNotFound => write!(f, "node not found"),
            Self::EdgeNotFound => write!(f, "edge not found"),
        }
    }
}

/// Broken structural property found by [`CapabilityDag::check_invariants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Stored edge count disagrees with the adjacency lists.
    EdgeCount { recorded: usize, actual: usize },
    /// An edge points past the populated node table.
    DanglingEdge { from: NodeRef },
    /// An edge from a node to itself.
    SelfEdge { node: NodeRef },
    /// An edge whose child has rights the parent lacks.
    Rights { parent: NodeRef, child: NodeRef },
    /// An edge whose child sits below the parent's level.
    Security { parent: NodeRef, child: NodeRef },
    /// The graph contains a cycle.
    Cycle,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagState {
    /// No nodes.
    Empty,
    /// At least one node.
    Populated,
}

/// Operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DagStats {
    /// Successful mutations (node creation, edge insertion and removal).
    pub operations_total: u64,
    /// `validate_derivation` calls that found a valid path.
    pub successful_derivations: u64,
    /// `validate_derivation` calls that did not.
    pub failed_derivations: u64,
}

/// One bit per node slot.
#[derive(Clone, Copy)]
struct Visited([u64; (KCAPABILITY_MAX_NODES + 63) / 64]);

impl Visited {
    const fn new() -> Self {
        Self([0; (KCAPABILITY_MAX_NODES + 63) / 64])
    }

    /// Mark `node`, returning true if it was not marked before.
    #[inline]
    fn insert(&mut self, node: NodeRef) -> bool {
        let (word, bit) = (node.index() / 64, node.index() % 64);
        let fresh = self.0[word] & (1 << bit) == 0;
        self.0[word] |= 1 << bit;
        fresh
    }
}

/// The capability derivation graph.
///
/// Owns its node table and edge pool; create as many independent instances
/// as needed.
#[derive(Debug)]
pub struct CapabilityDag {
    nodes: NodeStore,
    edges: EdgePool,
    edge_count: usize,
    operations: u64,
    derivations_ok: Cell<u64>,
    derivations_failed: Cell<u64>,
}

impl CapabilityDag {
    /// Create an empty DAG.
    pub fn new() -> Self {
        Self {
            nodes: NodeStore::new(),
            edges: EdgePool::new(),
            edge_count: 0,
            operations: 0,
            derivations_ok: Cell::new(0),
            derivations_failed: Cell::new(0),
        }
    }

    /// Drop every node and edge, returning to the empty state.
    ///
    /// Every `NodeRef` handed out before becomes invalid.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.edges.reset();
        self.edge_count = 0;
        self.operations = 0;
        self.derivations_ok.set(0);
        self.derivations_failed.set(0);
        log::trace!("kcap: dag reset");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DagState {
        if self.nodes.is_empty() {
            DagState::Empty
        } else {
            DagState::Populated
        }
    }

    /// Number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> DagStats {
        DagStats {
            operations_total: self.operations,
            successful_derivations: self.derivations_ok.get(),
            failed_derivations: self.derivations_failed.get(),
        }
    }

    /// Create a node.
    ///
    /// Returns None once `KCAPABILITY_MAX_NODES` nodes exist. Duplicate ids
    /// are accepted; each call yields a distinct reference.
    pub fn node_create(
        &mut self,
        id: CapId,
        rights_mask: RightsMask,
        security_level: SecurityLevel,
    ) -> Option<NodeRef> {
        let node = self.nodes.insert(id, rights_mask, security_level)?;
        self.operations += 1;
        Some(node)
    }

    /// Find the first node carrying `id`.
    pub fn lookup_node(&self, id: CapId) -> Option<NodeRef> {
        self.nodes.find(id)
    }

    /// Borrow a node.
    pub fn node(&self, node: NodeRef) -> Option<&CapabilityNode> {
        self.nodes.get(node)
    }

    /// Borrow a node mutably.
    ///
    /// Changes made here are not re-checked against the node's edges;
    /// [`validate_derivation`](Self::validate_derivation) will notice them.
    pub fn node_mut(&mut self, node: NodeRef) -> Option<&mut CapabilityNode> {
        self.nodes.get_mut(node)
    }

    /// Iterate over the children of `node` in insertion order.
    pub fn children(&self, node: NodeRef) -> impl Iterator<Item = (NodeRef, EdgeMeta)> + '_ {
        let list = self.nodes.get(node).map(|n| n.adjacency);
        list.into_iter()
            .flat_map(move |list| self.edges.iter(&list))
    }

    /// Add the derivation edge `parent → child`.
    pub fn add_edge(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DagError> {
        let (p, c) = match (self.nodes.get(parent), self.nodes.get(child)) {
            (Some(p), Some(c)) => (p, c),
            _ => return Err(DagError::NodeNotFound),
        };

        if parent == child {
            return Err(DagError::SelfReference);
        }
        if !c.rights_mask.is_subset_of(p.rights_mask) {
            return Err(DagError::RightsViolation);
        }
        if !p.security_level.may_derive(c.security_level) {
            return Err(DagError::SecurityViolation);
        }
        if self.path_exists(child, parent) {
            return Err(DagError::CycleDetected);
        }

        let meta = EdgeMeta {
            seq: self.operations,
        };
        let Some(node) = self.nodes.get_mut(parent) else {
            return Err(DagError::NodeNotFound);
        };
        if !self.edges.push(&mut node.adjacency, child, meta) {
            log::warn!("kcap: edge pool exhausted ({} edges)", self.edge_count);
            return Err(DagError::PoolExhausted);
        }

        self.edge_count += 1;
        self.operations += 1;
        log::trace!("kcap: edge {} -> {}", parent.index(), child.index());
        Ok(())
    }

    /// Remove the edge `parent → child`.
    pub fn remove_edge(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DagError> {
        if !self.nodes.contains(child) {
            return Err(DagError::NodeNotFound);
        }
        let node = self.nodes.get_mut(parent).ok_or(DagError::NodeNotFound)?;
        if !self.edges.remove(&mut node.adjacency, child) {
            return Err(DagError::EdgeNotFound);
        }

        self.edge_count -= 1;
        self.operations += 1;
        Ok(())
    }

    /// Check whether `target` is reachable from `source` by a path on which
    /// rights only narrow.
    ///
    /// Each hop re-checks `current.rights ⊆ predecessor.rights`, so a node
    /// altered after its edges were inserted breaks every path through it.
    /// A failing hop prunes that branch only; other paths may still succeed.
    /// `source == target` is always true.
    pub fn validate_derivation(&self, source: NodeRef, target: NodeRef) -> bool {
        let found = self.find_derivation(source, target);
        let counter = if found {
            &self.derivations_ok
        } else {
            &self.derivations_failed
        };
        counter.set(counter.get() + 1);
        found
    }

    fn find_derivation(&self, source: NodeRef, target: NodeRef) -> bool {
        if source == target {
            return true;
        }
        let Some(src) = self.nodes.get(source) else {
            return false;
        };
        if !self.nodes.contains(target) {
            return false;
        }

        // A node is expanded at most once, so every edge is pushed at most
        // once and the stack never holds more than the pool plus the source.
        let mut stack: Vec<(NodeRef, RightsMask), { KCAPABILITY_EDGE_POOL + 1 }> = Vec::new();
        let mut expanded = Visited::new();
        let _ = stack.push((source, src.rights_mask));

        while let Some((current, propagated)) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if !node.rights_mask.is_subset_of(propagated) {
                continue;
            }
            if current == target {
                return true;
            }
            // Only mark once the hop checked out: a node rejected via one
            // parent may still be reached legitimately via another.
            if !expanded.insert(current) {
                continue;
            }
            for (child, _) in self.edges.iter(&node.adjacency) {
                if stack.push((child, node.rights_mask)).is_err() {
                    panic!("kcap: derivation stack overflow");
                }
            }
        }
        false
    }

    /// Plain reachability from `from` to `to`.
    fn path_exists(&self, from: NodeRef, to: NodeRef) -> bool {
        if from == to {
            return true;
        }
        let mut stack: Vec<NodeRef, KCAPABILITY_MAX_NODES> = Vec::new();
        let mut visited = Visited::new();
        visited.insert(from);
        let _ = stack.push(from);

        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for (child, _) in self.edges.iter(&node.adjacency) {
                if child == to {
                    return true;
                }
                // Marked on push: each node enters the stack at most once.
                if visited.insert(child) && stack.push(child).is_err() {
                    panic!("kcap: reachability stack overflow");
                }
            }
        }
        false
    }

    /// Audit the whole graph.
    ///
    /// Verifies the edge count, that every edge stays inside the node table,
    /// and that I1-I4 hold for every stored edge.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut actual = 0usize;
        let mut in_degree = [0u16; KCAPABILITY_MAX_NODES];

        for (parent, node) in self.nodes.iter() {
            for (child, _) in self.edges.iter(&node.adjacency) {
                actual += 1;
                let Some(c) = self.nodes.get(child) else {
                    return Err(InvariantViolation::DanglingEdge { from: parent });
                };
                if child == parent {
                    return Err(InvariantViolation::SelfEdge { node: parent });
                }
                if !c.rights_mask.is_subset_of(node.rights_mask) {
                    return Err(InvariantViolation::Rights { parent, child });
                }
                if !node.security_level.may_derive(c.security_level) {
                    return Err(InvariantViolation::Security { parent, child });
                }
                in_degree[child.index()] += 1;
            }
        }

        if actual != self.edge_count {
            return Err(InvariantViolation::EdgeCount {
                recorded: self.edge_count,
                actual,
            });
        }

        // Kahn: peel off nodes with no remaining parents; a leftover means a cycle.
        let mut ready: Vec<NodeRef, KCAPABILITY_MAX_NODES> = Vec::new();
        for (node, _) in self.nodes.iter() {
            if in_degree[node.index()] == 0 {
                let _ = ready.push(node);
            }
        }
        let mut peeled = 0usize;
        while let Some(node) = ready.pop() {
            peeled += 1;
            let Some(n) = self.nodes.get(node) else {
                continue;
            };
            for (child, _) in self.edges.iter(&n.adjacency) {
                in_degree[child.index()] -= 1;
                if in_degree[child.index()] == 0 {
                    let _ = ready.push(child);
                }
            }
        }
        if peeled != self.nodes.len() {
            return Err(InvariantViolation::Cycle);
        }
        Ok(())
    }
}

impl Default for CapabilityDag {
    fn default() -> Self {
        Self::new()
    }
}

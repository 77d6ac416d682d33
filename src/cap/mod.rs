//! Capability Derivation Graph
//!
//! Tracks which capability was derived from which, and refuses any
//! derivation that would amplify rights, lower the security level, or
//! introduce a cycle.
//!
//! # Design
//! - `NodeStore`: append-only table of nodes, addressed by `NodeRef`
//! - `EdgePool`: bounded arena backing every adjacency list
//! - `CapabilityDag`: edge insertion checks and derivation validation
//!
//! # Security Properties
//! - No edge from a node to itself
//! - Rights only narrow along an edge
//! - Security levels only rise along an edge
//! - The graph stays acyclic under every mutation

pub mod dag;
pub mod edge;
pub mod node;
pub mod rights;

pub use dag::{
    CapabilityDag, DagError, DagState, DagStats, InvariantViolation, KCAP_ALLOC_FAILURE,
    KCAP_CYCLE_DETECTED, KCAP_EDGE_NOT_FOUND, KCAP_NODE_NOT_FOUND, KCAP_RIGHTS_VIOLATION,
    KCAP_SECURITY_VIOLATION, KCAP_SELF_REFERENCE, KCAP_SUCCESS,
};
pub use edge::EdgeMeta;
pub use node::{CapabilityNode, NodeRef};
pub use rights::{CapId, RightsMask, SecurityLevel};

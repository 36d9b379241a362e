//! Type-safe handles for diagram nodes and decision variables.
//!
//! This module provides newtype wrappers that enforce compile-time distinction
//! between node identifiers and variable identifiers, preventing common
//! mistakes in diagram manipulation code.
use std::fmt;

/// An identifier of a diagram node (1-indexed).
///
/// Node identifiers are opaque handles into a single store; index 0 is a
/// reserved sentry and never names a live node. Equality of identifiers
/// implies semantic equality of the sub-functions they root (within the store
/// that produced them; identifiers from different stores must not be mixed).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a new node identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`. Index 0 is the store sentry.
    pub fn new(id: u32) -> Self {
        assert_ne!(id, 0, "Node ids must be >= 1");
        NodeId(id)
    }

    /// Returns the raw identifier as a `u32`.
    pub fn id(self) -> u32 {
        self.0
    }

    /// Returns the raw identifier as a `usize` (for arena indexing).
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// A decision-variable identifier (1-indexed).
///
/// Variables represent Boolean decision points. Their ids are independent of
/// their position in the variable ordering; see [`VarOrder`][crate::order::VarOrder]
/// for the id-to-level mapping.
///
/// # Invariants
///
/// - Variable ids must be >= 1 (0 is reserved for terminals)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VarId(u32);

impl VarId {
    /// Creates a new variable with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`. Variables must be 1-indexed.
    pub fn new(id: u32) -> Self {
        assert_ne!(id, 0, "Variable ids must be >= 1");
        VarId(id)
    }

    /// Returns the raw variable id as a `u32`.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<VarId> for u32 {
    fn from(var: VarId) -> Self {
        var.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_creation() {
        let n1 = NodeId::new(1);
        let n2 = NodeId::new(2);
        assert_eq!(n1.id(), 1);
        assert_eq!(n2.index(), 2);
        assert!(n1 < n2);
    }

    #[test]
    #[should_panic(expected = "Node ids must be >= 1")]
    fn test_node_id_zero_panics() {
        NodeId::new(0);
    }

    #[test]
    fn test_var_creation() {
        let v1 = VarId::new(1);
        let v2 = VarId::new(2);
        assert_eq!(v1.id(), 1);
        assert_eq!(v2.id(), 2);
        assert!(v1 < v2);
    }

    #[test]
    #[should_panic(expected = "Variable ids must be >= 1")]
    fn test_var_zero_panics() {
        VarId::new(0);
    }
}

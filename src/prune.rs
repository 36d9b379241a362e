//! Bounded-error sub-diagram replacement.
//!
//! A sub-diagram whose value range fits inside `2 · max_error` collapses to a
//! single terminal. The replacement value is chosen per [`PruneMode`]:
//! `Min` yields a pointwise lower bound of the original, `Max` an upper
//! bound, and `Avg` the midpoint, which keeps the pointwise deviation within
//! `max_error`.

use hashbrown::HashMap;

use crate::aadd::{Aadd, AaddNode, AffineEdge, AaddRef};
use crate::add::{Add, AddNode};
use crate::types::NodeId;

/// How a collapsed sub-diagram picks its terminal value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PruneMode {
    /// Replace by the sub-diagram minimum (lower bound).
    Min,
    /// Replace by the sub-diagram maximum (upper bound).
    Max,
    /// Replace by the midpoint (minimal worst-case deviation).
    Avg,
}

impl PruneMode {
    fn pick(self, min: f64, max: f64) -> f64 {
        match self {
            PruneMode::Min => min,
            PruneMode::Max => max,
            PruneMode::Avg => (min + max) / 2.0,
        }
    }
}

/// The manager-global pruning configuration, set via `set_prune_info`.
#[derive(Debug, Copy, Clone)]
pub struct PruneInfo {
    pub mode: PruneMode,
    pub max_error: f64,
}

impl Default for PruneInfo {
    fn default() -> Self {
        Self {
            mode: PruneMode::Avg,
            max_error: 0.0,
        }
    }
}

impl Add {
    /// Configure subsequent [`prune_nodes`][Add::prune_nodes] calls.
    pub fn set_prune_info(&mut self, mode: PruneMode, max_error: f64) {
        assert!(max_error >= 0.0, "max_error must be non-negative");
        self.prune_info = PruneInfo { mode, max_error };
    }

    /// Replace every sub-diagram whose range fits in `2 · max_error` by a
    /// terminal, per the configured mode.
    pub fn prune_nodes(&mut self, f: NodeId) -> NodeId {
        let info = self.prune_info;
        let mut memo = HashMap::new();
        self.prune_rec(f, info, &mut memo)
    }

    fn prune_rec(
        &mut self,
        f: NodeId,
        info: PruneInfo,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let (var, low, high) = match self.node(f) {
            AddNode::Terminal { .. } => return f,
            AddNode::Internal {
                var,
                low,
                high,
                min,
                max,
            } => {
                if max - min <= 2.0 * info.max_error {
                    return self.get_constant_node(info.mode.pick(min, max));
                }
                (var, low, high)
            }
        };

        if let Some(&res) = memo.get(&f) {
            return res;
        }

        let low = self.prune_rec(low, info, memo);
        let high = self.prune_rec(high, info, memo);
        let res = self.mk_node(var, low, high);
        let _ = memo.insert(f, res);
        res
    }
}

impl Aadd {
    /// Configure subsequent [`prune_nodes`][Aadd::prune_nodes] calls.
    pub fn set_prune_info(&mut self, mode: PruneMode, max_error: f64) {
        assert!(max_error >= 0.0, "max_error must be non-negative");
        self.prune_info = PruneInfo { mode, max_error };
    }

    /// Bounded-error pruning over references.
    ///
    /// A branch's absolute range is its edge scale times the accumulated
    /// scale of the path to it (normalized nodes span `[0, 1]`), so the walk
    /// carries the scale down and collapses edges as soon as their branch
    /// fits the error budget.
    pub fn prune_nodes(&mut self, f: NodeId) -> NodeId {
        let info = self.prune_info;
        let r = self.reference(f);
        if r.node == self.terminal_node() {
            return f;
        }
        if r.c <= 2.0 * info.max_error {
            let value = info.mode.pick(r.b, r.b + r.c);
            return self.get_constant_node(value);
        }
        let mut memo = HashMap::new();
        let inner = self.prune_node(r.node, r.c, info, &mut memo);
        let c = r.c * inner.c;
        let b = r.c * inner.b + r.b;
        self.intern_triple(c, b, inner.node)
    }

    fn prune_node(
        &mut self,
        node: NodeId,
        scale: f64,
        info: PruneInfo,
        memo: &mut HashMap<(NodeId, u64), AaddRef>,
    ) -> AaddRef {
        let key = (node, scale.to_bits());
        if let Some(&res) = memo.get(&key) {
            return res;
        }

        let (var, low, high) = match self.node(node) {
            AaddNode::Internal { var, low, high } => (var, low, high),
            AaddNode::Terminal => unreachable!("prune_node is never called on the terminal"),
        };

        let low = self.prune_edge(low, scale, info, memo);
        let high = self.prune_edge(high, scale, info, memo);
        let res = self.mk_edges(var, low, high);
        let _ = memo.insert(key, res);
        res
    }

    fn prune_edge(
        &mut self,
        edge: AffineEdge,
        scale: f64,
        info: PruneInfo,
        memo: &mut HashMap<(NodeId, u64), AaddRef>,
    ) -> AffineEdge {
        if edge.target == self.terminal_node() {
            return edge;
        }
        // Branch range in absolute terms is scale * c (the child spans [0, 1]).
        if scale * edge.c <= 2.0 * info.max_error {
            let value = info.mode.pick(edge.b, edge.b + edge.c);
            return AffineEdge::new(0.0, value, self.terminal_node());
        }
        let sub = self.prune_node(edge.target, scale * edge.c, info, memo);
        AffineEdge::new(edge.c * sub.c, edge.c * sub.b + edge.b, sub.node)
    }
}

//! The ADD engine: reduced ordered decision diagrams with real terminals.
//!
//! # What is an ADD?
//!
//! An Algebraic Decision Diagram represents a function from Boolean decision
//! variables to the reals as a directed acyclic graph. For a fixed variable
//! ordering the reduced form is canonical: equal sub-functions share the same
//! node, so equality of identifiers decides equality of functions.
//!
//! # Manager-centric architecture
//!
//! All operations go through the [`Add`] manager. It owns the node arena, the
//! hash-cons table enforcing canonical sharing, and the operation caches. The
//! caller holds plain [`NodeId`] handles and must anchor the roots it wants to
//! survive a [`flush_caches`][Add::flush_caches] via
//! [`add_special_node`][Add::add_special_node].
//!
//! Each internal node represents a Shannon decomposition:
//! ```text
//! f = (¬v ? f_low : f_high)
//! ```
//! and carries its function's `min`/`max` bounds, memoized at construction.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::cache::OpCache;
use crate::op::BinOp;
use crate::order::VarOrder;
use crate::prune::PruneInfo;
use crate::storage::Storage;
use crate::types::{NodeId, VarId};
use crate::utils::{approx_eq, pairing2, pairing4, quantize, MyHash};

/// A node of an ADD: a real-valued terminal or an internal decision node.
///
/// The `min`/`max` fields of internal nodes are derived bounds; structural
/// equality and hashing consider only the reduction key `(var, low, high)`
/// (terminals: the quantized value).
#[derive(Debug, Copy, Clone)]
pub enum AddNode {
    Terminal {
        value: f64,
    },
    Internal {
        var: VarId,
        low: NodeId,
        high: NodeId,
        min: f64,
        max: f64,
    },
}

impl PartialEq for AddNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AddNode::Terminal { value: a }, AddNode::Terminal { value: b }) => {
                a.to_bits() == b.to_bits()
            }
            (
                AddNode::Internal {
                    var: v1,
                    low: l1,
                    high: h1,
                    ..
                },
                AddNode::Internal {
                    var: v2,
                    low: l2,
                    high: h2,
                    ..
                },
            ) => v1 == v2 && l1 == l2 && h1 == h2,
            _ => false,
        }
    }
}

impl Eq for AddNode {}

impl MyHash for AddNode {
    fn hash(&self) -> u64 {
        match *self {
            AddNode::Terminal { value } => pairing2(0, value.to_bits()),
            AddNode::Internal { var, low, high, .. } => {
                pairing4(1, var.id() as u64, low.id() as u64, high.id() as u64)
            }
        }
    }
}

/// The ADD manager: node store, hash-cons table, operation caches and root
/// anchors for one variable ordering.
pub struct Add {
    order: VarOrder,
    storage: Storage<AddNode>,
    special: HashMap<NodeId, u32>,
    apply_cache: OpCache<(BinOp, NodeId, NodeId), NodeId>,
    restrict_cache: OpCache<(NodeId, VarId, bool), NodeId>,
    pub(crate) prune_info: PruneInfo,
    /// The terminal 0 (anchored for the manager's lifetime).
    pub zero: NodeId,
    /// The terminal 1 (anchored for the manager's lifetime).
    pub one: NodeId,
}

impl Add {
    /// Create a manager for `order` with the default store size.
    pub fn new(order: VarOrder) -> Self {
        Self::with_bits(order, 18)
    }

    /// Create a manager with a store of `2^storage_bits` cells.
    pub fn with_bits(order: VarOrder, storage_bits: usize) -> Self {
        let mut storage = Storage::new(storage_bits);

        // Reserve the 0/1 terminals up front; they stay anchored forever.
        let zero = NodeId::new(storage.put(AddNode::Terminal { value: 0.0 }) as u32);
        let one = NodeId::new(storage.put(AddNode::Terminal { value: 1.0 }) as u32);

        let mut special = HashMap::new();
        special.insert(zero, 1);
        special.insert(one, 1);

        let cache_bits = storage_bits.min(16);
        Self {
            order,
            storage,
            special,
            apply_cache: OpCache::new(cache_bits),
            restrict_cache: OpCache::new(cache_bits),
            prune_info: PruneInfo::default(),
            zero,
            one,
        }
    }

    pub fn order(&self) -> &VarOrder {
        &self.order
    }

    /// Number of live nodes in the store (terminals included).
    pub fn num_nodes(&self) -> usize {
        self.storage.real_size()
    }

    pub(crate) fn node(&self, id: NodeId) -> AddNode {
        self.storage.value(id.index())
    }

    pub fn is_terminal(&self, id: NodeId) -> bool {
        matches!(self.node(id), AddNode::Terminal { .. })
    }

    /// The value of a terminal node.
    ///
    /// # Panics
    ///
    /// Panics if `id` names an internal node.
    pub fn terminal_value(&self, id: NodeId) -> f64 {
        match self.node(id) {
            AddNode::Terminal { value } => value,
            AddNode::Internal { .. } => panic!("Node {} is not a terminal", id),
        }
    }

    pub fn var(&self, id: NodeId) -> VarId {
        match self.node(id) {
            AddNode::Internal { var, .. } => var,
            AddNode::Terminal { .. } => panic!("Node {} is a terminal", id),
        }
    }

    pub fn low(&self, id: NodeId) -> NodeId {
        match self.node(id) {
            AddNode::Internal { low, .. } => low,
            AddNode::Terminal { .. } => panic!("Node {} is a terminal", id),
        }
    }

    pub fn high(&self, id: NodeId) -> NodeId {
        match self.node(id) {
            AddNode::Internal { high, .. } => high,
            AddNode::Terminal { .. } => panic!("Node {} is a terminal", id),
        }
    }

    /// The level of the node: position of its variable in the order, or the
    /// terminal level.
    pub fn level(&self, id: NodeId) -> usize {
        match self.node(id) {
            AddNode::Terminal { .. } => self.order.terminal_level(),
            AddNode::Internal { var, .. } => self.order.level(var),
        }
    }

    /// `(min, max)` bounds of the function rooted at `id`.
    pub fn bounds(&self, id: NodeId) -> (f64, f64) {
        match self.node(id) {
            AddNode::Terminal { value } => (value, value),
            AddNode::Internal { min, max, .. } => (min, max),
        }
    }

    pub fn min_value(&self, id: NodeId) -> f64 {
        self.bounds(id).0
    }

    pub fn max_value(&self, id: NodeId) -> f64 {
        self.bounds(id).1
    }

    /// Canonical terminal for `value` (within the relative tolerance).
    pub fn get_constant_node(&mut self, value: f64) -> NodeId {
        let value = quantize(value);
        assert!(value.is_finite(), "Terminal value must be finite");
        NodeId::new(self.storage.put(AddNode::Terminal { value }) as u32)
    }

    /// The leaf-valued variable node `v ? high_val : low_val`.
    ///
    /// Returns the constant when both values coincide (within tolerance).
    pub fn get_var_node(&mut self, var: VarId, low_val: f64, high_val: f64) -> NodeId {
        if approx_eq(low_val, high_val) {
            return self.get_constant_node(low_val);
        }
        let low = self.get_constant_node(low_val);
        let high = self.get_constant_node(high_val);
        self.mk_node(var, low, high)
    }

    /// Reduced canonical construction of an internal node.
    ///
    /// Enforces both reduction rules: redundant nodes collapse to their child,
    /// duplicate `(var, low, high)` triples share one id.
    pub fn mk_node(&mut self, var: VarId, low: NodeId, high: NodeId) -> NodeId {
        debug!("mk(var = {}, low = {}, high = {})", var, low, high);

        let level = self.order.level(var);
        assert!(
            level < self.level(low) && level < self.level(high),
            "Order violated at {} -> ({}, {})",
            var,
            low,
            high
        );

        if low == high {
            return low;
        }

        let (lmin, lmax) = self.bounds(low);
        let (hmin, hmax) = self.bounds(high);
        let node = AddNode::Internal {
            var,
            low,
            high,
            min: lmin.min(hmin),
            max: lmax.max(hmax),
        };
        NodeId::new(self.storage.put(node) as u32)
    }

    /// The generic binary combinator.
    ///
    /// Recurses on the Shannon decomposition of both operands at the minimum
    /// variable and rebuilds through reduced construction. Comparison
    /// operations return 0/1 indicator diagrams.
    pub fn apply(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId {
        debug!("apply(f = {}, g = {}, op = {})", f, g, op);

        if let (AddNode::Terminal { value: a }, AddNode::Terminal { value: b }) =
            (self.node(f), self.node(g))
        {
            return self.get_constant_node(op.eval(a, b));
        }

        if let Some(res) = self.apply_shortcut(f, g, op) {
            debug!("apply: shortcut {} {} {} -> {}", f, op, g, res);
            return res;
        }

        let key = self.cache_key(f, g, op);
        if let Some(&res) = self.apply_cache.get(&key) {
            debug!("cache: apply(f = {}, g = {}, op = {}) -> {}", f, g, op, res);
            return res;
        }

        let level = self.level(f).min(self.level(g));
        let var = self.order.var_at(level);
        let (f0, f1) = self.cofactors(f, level);
        let (g0, g1) = self.cofactors(g, level);

        let low = self.apply(f0, g0, op);
        let high = self.apply(f1, g1, op);
        let res = self.mk_node(var, low, high);

        self.apply_cache.insert(key, res);
        res
    }

    fn cache_key(&self, f: NodeId, g: NodeId, op: BinOp) -> (BinOp, NodeId, NodeId) {
        if op.is_commutative() && g < f {
            (op, g, f)
        } else {
            (op, f, g)
        }
    }

    /// The top cofactors of `f` with respect to the variable at `level`.
    fn cofactors(&self, f: NodeId, level: usize) -> (NodeId, NodeId) {
        if self.level(f) == level {
            (self.low(f), self.high(f))
        } else {
            (f, f)
        }
    }

    /// Algebraic short-circuits that avoid opening the operands.
    fn apply_shortcut(&mut self, f: NodeId, g: NodeId, op: BinOp) -> Option<NodeId> {
        match op {
            BinOp::Sum => {
                if f == self.zero {
                    return Some(g);
                }
                if g == self.zero {
                    return Some(f);
                }
            }
            BinOp::Minus => {
                if g == self.zero {
                    return Some(f);
                }
                if f == g {
                    return Some(self.zero);
                }
            }
            BinOp::Prod => {
                if f == self.zero || g == self.zero {
                    return Some(self.zero);
                }
                if f == self.one {
                    return Some(g);
                }
                if g == self.one {
                    return Some(f);
                }
            }
            BinOp::Div => {
                if g == self.one {
                    return Some(f);
                }
            }
            BinOp::Min | BinOp::Max => {
                if f == g {
                    return Some(f);
                }
                let (fmin, fmax) = self.bounds(f);
                let (gmin, gmax) = self.bounds(g);
                if op == BinOp::Min {
                    if fmax < gmin || approx_eq(fmax, gmin) {
                        return Some(f);
                    }
                    if gmax < fmin || approx_eq(gmax, fmin) {
                        return Some(g);
                    }
                } else {
                    if fmin > gmax || approx_eq(fmin, gmax) {
                        return Some(f);
                    }
                    if gmin > fmax || approx_eq(gmin, fmax) {
                        return Some(g);
                    }
                }
            }
            _ => {
                debug_assert!(op.is_comparison());
                return self.compare_shortcut(f, g, op);
            }
        }
        None
    }

    /// Decide a comparison from the operand bounds when the answer is the
    /// same for every assignment.
    fn compare_shortcut(&mut self, f: NodeId, g: NodeId, op: BinOp) -> Option<NodeId> {
        if f == g {
            let res = match op {
                BinOp::GreaterEq | BinOp::LessEq | BinOp::Eq => self.one,
                _ => self.zero,
            };
            return Some(res);
        }
        let (fmin, fmax) = self.bounds(f);
        let (gmin, gmax) = self.bounds(g);
        let strictly_above = fmin > gmax && !approx_eq(fmin, gmax);
        let above_or_touching = fmin > gmax || approx_eq(fmin, gmax);
        let strictly_below = fmax < gmin && !approx_eq(fmax, gmin);
        let below_or_touching = fmax < gmin || approx_eq(fmax, gmin);
        match op {
            BinOp::Greater => {
                if strictly_above {
                    return Some(self.one);
                }
                if below_or_touching {
                    return Some(self.zero);
                }
            }
            BinOp::GreaterEq => {
                if above_or_touching {
                    return Some(self.one);
                }
                if strictly_below {
                    return Some(self.zero);
                }
            }
            BinOp::Less => {
                if strictly_below {
                    return Some(self.one);
                }
                if above_or_touching {
                    return Some(self.zero);
                }
            }
            BinOp::LessEq => {
                if below_or_touching {
                    return Some(self.one);
                }
                if strictly_above {
                    return Some(self.zero);
                }
            }
            BinOp::Eq | BinOp::NotEq => {
                if strictly_above || strictly_below {
                    let res = if op == BinOp::Eq { self.zero } else { self.one };
                    return Some(res);
                }
            }
            _ => unreachable!("not a comparison: {}", op),
        }
        None
    }

    /// Substitute `var := value` in `f`.
    ///
    /// Restricting a variable that does not occur in `f` returns `f`
    /// unchanged; in particular a second restriction of the same variable is
    /// a no-op.
    pub fn restrict(&mut self, f: NodeId, var: VarId, value: bool) -> NodeId {
        let target = self.order.level(var);
        let level = self.level(f);

        if level > target {
            // The variable cannot occur below this node.
            return f;
        }
        if level == target {
            return if value { self.high(f) } else { self.low(f) };
        }

        let key = (f, var, value);
        if let Some(&res) = self.restrict_cache.get(&key) {
            return res;
        }

        let v = self.var(f);
        let low = self.low(f);
        let high = self.high(f);
        let low = self.restrict(low, var, value);
        let high = self.restrict(high, var, value);
        let res = self.mk_node(v, low, high);

        self.restrict_cache.insert(key, res);
        res
    }

    /// Evaluate `f` under a complete assignment indexed by level.
    pub fn evaluate(&self, f: NodeId, assignment: &[bool]) -> f64 {
        let mut node = f;
        loop {
            match self.node(node) {
                AddNode::Terminal { value } => return value,
                AddNode::Internal { var, low, high, .. } => {
                    let level = self.order.level(var);
                    node = if assignment[level] { high } else { low };
                }
            }
        }
    }

    /// All distinct nodes reachable from `roots`, terminals included.
    pub fn descendants(&self, roots: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        let mut result = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            result.push(id);
            if let AddNode::Internal { low, high, .. } = self.node(id) {
                stack.push(low);
                stack.push(high);
            }
        }
        result
    }

    /// Number of distinct nodes in the DAG rooted at `f` (terminals included).
    pub fn count_exact_nodes(&self, f: NodeId) -> usize {
        self.descendants([f]).len()
    }

    /// Render `f` as a bracket string: `@id:(xV, high, low)`, terminals as
    /// `(value)`.
    pub fn print_node(&self, f: NodeId) -> String {
        match self.node(f) {
            AddNode::Terminal { value } => format!("{}:({})", f, value),
            AddNode::Internal { var, low, high, .. } => format!(
                "{}:({}, {}, {})",
                f,
                var,
                self.print_node(high),
                self.print_node(low)
            ),
        }
    }

    /// Anchor `f` against cache flushes. May be called repeatedly; each call
    /// must be balanced by [`remove_special_node`][Add::remove_special_node].
    pub fn add_special_node(&mut self, f: NodeId) {
        assert!(
            self.storage.is_occupied(f.index()),
            "Unknown node {}",
            f
        );
        *self.special.entry(f).or_insert(0) += 1;
    }

    /// Drop one anchor of `f`.
    ///
    /// # Panics
    ///
    /// Panics if `f` is not currently anchored (unbalanced root management).
    pub fn remove_special_node(&mut self, f: NodeId) {
        let count = match self.special.get(&f) {
            Some(&count) => count,
            None => panic!("Node {} is not special", f),
        };
        if count > 1 {
            let _ = self.special.insert(f, count - 1);
        } else {
            let _ = self.special.remove(&f);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_special(&self, f: NodeId) -> bool {
        self.special.contains_key(&f)
    }

    /// Clear the operation caches and reclaim every node unreachable from an
    /// anchored root. Surviving identifiers are stable. `rebuild_hash_cons`
    /// forces a hash-cons relink even when nothing was dropped.
    pub fn flush_caches(&mut self, rebuild_hash_cons: bool) {
        self.apply_cache.clear();
        self.restrict_cache.clear();

        let reachable: HashSet<NodeId> = self
            .descendants(self.special.keys().copied().collect::<Vec<_>>())
            .into_iter()
            .collect();

        let doomed: Vec<usize> = self
            .storage
            .indices()
            .filter(|&i| !reachable.contains(&NodeId::new(i as u32)))
            .collect();
        for i in &doomed {
            self.storage.drop_cell(*i);
        }
        if !doomed.is_empty() || rebuild_hash_cons {
            self.storage.rebuild();
        }
        debug!(
            "flush: dropped {} nodes, {} remain",
            doomed.len(),
            self.storage.real_size()
        );
    }
}

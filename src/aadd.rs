//! The AADD engine: affine-extended decision diagrams.
//!
//! An Affine ADD attaches an affine pair `(c, b)` with `c >= 0` to every edge,
//! so that isomorphic sub-functions canonicalize modulo an affine factor. A
//! *reference* `(c, b, node)` denotes the function `c · f_node + b`; the
//! external identifiers handed to callers name hash-consed entries of a
//! reference table, exactly like the node identifiers of the ADD engine.
//!
//! # Canonical form
//!
//! Every internal node is range-normalized: `min(b_low, b_high) == 0` and
//! `max(c_low + b_low, c_high + b_high) == 1`, so the node's own function has
//! range exactly `[0, 1]` and the bounds of a reference `(c, b, node)` are
//! `[b, b + c]` with no recursion needed. A single canonical terminal exists at
//! the reserved id 1; edges into it always carry `c == 0` (the constant lives
//! in the offset), so its own value is never observed.
//!
//! The payoff over the ADD is sharing: the sum `x_1 + ... + x_5` needs one
//! internal node per level here, against a quadratic node count (and a leaf
//! per partial sum) in the ADD.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::cache::OpCache;
use crate::op::BinOp;
use crate::order::VarOrder;
use crate::prune::PruneInfo;
use crate::storage::Storage;
use crate::types::{NodeId, VarId};
use crate::utils::{approx_eq, pairing4, quantize, MyHash, EPSILON};

/// An affine edge: the reference `c · f_target + b` with `c >= 0`.
///
/// Stored factors are quantized, so equality and hashing are bitwise.
#[derive(Debug, Copy, Clone)]
pub struct AffineEdge {
    pub c: f64,
    pub b: f64,
    pub target: NodeId,
}

impl AffineEdge {
    pub(crate) fn new(c: f64, b: f64, target: NodeId) -> Self {
        Self {
            c: quantize(c),
            b: quantize(b),
            target,
        }
    }
}

impl PartialEq for AffineEdge {
    fn eq(&self, other: &Self) -> bool {
        self.c.to_bits() == other.c.to_bits()
            && self.b.to_bits() == other.b.to_bits()
            && self.target == other.target
    }
}

impl Eq for AffineEdge {}

impl MyHash for AffineEdge {
    fn hash(&self) -> u64 {
        pairing4(0, self.c.to_bits(), self.b.to_bits(), self.target.id() as u64)
    }
}

/// A node of the node table: the canonical terminal or a normalized internal
/// decision node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AaddNode {
    Terminal,
    Internal {
        var: VarId,
        low: AffineEdge,
        high: AffineEdge,
    },
}

impl MyHash for AaddNode {
    fn hash(&self) -> u64 {
        match *self {
            AaddNode::Terminal => 1,
            AaddNode::Internal { var, low, high } => {
                pairing4(2, var.id() as u64, MyHash::hash(&low), MyHash::hash(&high))
            }
        }
    }
}

/// An external reference `c · f_node + b`, hash-consed in the reference table.
#[derive(Debug, Copy, Clone)]
pub struct AaddRef {
    pub c: f64,
    pub b: f64,
    pub node: NodeId,
}

impl PartialEq for AaddRef {
    fn eq(&self, other: &Self) -> bool {
        self.c.to_bits() == other.c.to_bits()
            && self.b.to_bits() == other.b.to_bits()
            && self.node == other.node
    }
}

impl Eq for AaddRef {}

impl MyHash for AaddRef {
    fn hash(&self) -> u64 {
        pairing4(3, self.c.to_bits(), self.b.to_bits(), self.node.id() as u64)
    }
}

/// The AADD manager: node table, reference table, operation caches and root
/// anchors for one variable ordering.
///
/// External [`NodeId`]s name reference-table entries; the node table is
/// internal. Anchors ([`add_special_node`][Aadd::add_special_node]) are held
/// on references; everything unreachable from an anchor is reclaimed by
/// [`flush_caches`][Aadd::flush_caches].
pub struct Aadd {
    order: VarOrder,
    nodes: Storage<AaddNode>,
    refs: Storage<AaddRef>,
    special: HashMap<NodeId, u32>,
    terminal: NodeId,
    apply_cache: OpCache<(BinOp, NodeId, NodeId), NodeId>,
    sign_cache: OpCache<(BinOp, NodeId), NodeId>,
    restrict_cache: OpCache<(NodeId, VarId, bool), NodeId>,
    pub(crate) prune_info: PruneInfo,
}

impl Aadd {
    /// Create a manager for `order` with the default store size.
    pub fn new(order: VarOrder) -> Self {
        Self::with_bits(order, 18)
    }

    /// Create a manager with node and reference tables of `2^storage_bits` cells.
    pub fn with_bits(order: VarOrder, storage_bits: usize) -> Self {
        let mut nodes = Storage::new(storage_bits);

        // The canonical terminal occupies the reserved node id 1.
        let terminal = NodeId::new(nodes.put(AaddNode::Terminal) as u32);
        assert_eq!(terminal.id(), 1);

        let cache_bits = storage_bits.min(16);
        Self {
            order,
            nodes,
            refs: Storage::new(storage_bits),
            special: HashMap::new(),
            terminal,
            apply_cache: OpCache::new(cache_bits),
            sign_cache: OpCache::new(cache_bits),
            restrict_cache: OpCache::new(cache_bits),
            prune_info: PruneInfo::default(),
        }
    }

    pub fn order(&self) -> &VarOrder {
        &self.order
    }

    /// Number of live internal and terminal nodes (references not counted).
    pub fn num_nodes(&self) -> usize {
        self.nodes.real_size()
    }

    /// Number of live references.
    pub fn num_refs(&self) -> usize {
        self.refs.real_size()
    }

    /// Resolve an external reference id.
    pub fn reference(&self, id: NodeId) -> AaddRef {
        self.refs.value(id.index())
    }

    pub(crate) fn node(&self, id: NodeId) -> AaddNode {
        self.nodes.value(id.index())
    }

    pub(crate) fn terminal_node(&self) -> NodeId {
        self.terminal
    }

    /// Intern a reference triple, quantizing its factors.
    fn intern(&mut self, c: f64, b: f64, node: NodeId) -> NodeId {
        let c = quantize(c);
        let b = quantize(b);
        debug_assert!(c >= 0.0, "Reference scale must be non-negative: {}", c);
        debug_assert!(
            node != self.terminal || c == 0.0,
            "Terminal references must carry c == 0"
        );
        NodeId::new(self.refs.put(AaddRef { c, b, node }) as u32)
    }

    fn intern_ref(&mut self, r: AaddRef) -> NodeId {
        self.intern(r.c, r.b, r.node)
    }

    /// Intern a raw triple (crate-internal, used by the pruning walk).
    pub(crate) fn intern_triple(&mut self, c: f64, b: f64, node: NodeId) -> NodeId {
        self.intern(c, b, node)
    }

    /// Make-canonical over explicit edges (crate-internal).
    pub(crate) fn mk_edges(&mut self, var: VarId, low: AffineEdge, high: AffineEdge) -> AaddRef {
        self.mk(var, low, high)
    }

    /// Level of a node-table entry.
    fn node_level(&self, node: NodeId) -> usize {
        match self.node(node) {
            AaddNode::Terminal => self.order.terminal_level(),
            AaddNode::Internal { var, .. } => self.order.level(var),
        }
    }

    /// `(min, max)` of a reference: exactly `[b, b + c]` by normalization.
    pub fn bounds(&self, id: NodeId) -> (f64, f64) {
        let r = self.reference(id);
        (r.b, quantize(r.b + r.c))
    }

    pub fn min_value(&self, id: NodeId) -> f64 {
        self.bounds(id).0
    }

    pub fn max_value(&self, id: NodeId) -> f64 {
        self.bounds(id).1
    }

    /// Canonical constant reference `(0, value, terminal)`.
    pub fn get_constant_node(&mut self, value: f64) -> NodeId {
        assert!(value.is_finite(), "Terminal value must be finite");
        self.intern(0.0, value, self.terminal)
    }

    /// The leaf-valued variable reference `v ? high_val : low_val`.
    pub fn get_var_node(&mut self, var: VarId, low_val: f64, high_val: f64) -> NodeId {
        if approx_eq(low_val, high_val) {
            return self.get_constant_node(low_val);
        }
        let low = AffineEdge::new(0.0, low_val, self.terminal);
        let high = AffineEdge::new(0.0, high_val, self.terminal);
        let r = self.mk(var, low, high);
        self.intern_ref(r)
    }

    /// Make-canonical: reduce and range-normalize a prospective node.
    ///
    /// The resulting internal node satisfies `min(b_low, b_high) == 0` and
    /// `max(c_low + b_low, c_high + b_high) == 1`; the extracted offset and
    /// scale are pushed onto the returned reference.
    fn mk(&mut self, var: VarId, low: AffineEdge, high: AffineEdge) -> AaddRef {
        debug!("mk(var = {}, low = {:?}, high = {:?})", var, low, high);

        let level = self.order.level(var);
        assert!(
            level < self.node_level(low.target) && level < self.node_level(high.target),
            "Order violated at {}",
            var
        );

        // Reduction: a node whose branches agree element-wise is redundant.
        if low == high {
            return AaddRef {
                c: low.c,
                b: low.b,
                node: low.target,
            };
        }

        let b = low.b.min(high.b);
        let c = (low.c + low.b).max(high.c + high.b) - b;

        // Underflow clamp: a vanishing range means both branches are the
        // constant b.
        if c <= EPSILON * b.abs().max(1.0) {
            return AaddRef {
                c: 0.0,
                b: quantize(b),
                node: self.terminal,
            };
        }

        let low = self.normalize_edge(low, b, c);
        let high = self.normalize_edge(high, b, c);
        let node = NodeId::new(self.nodes.put(AaddNode::Internal { var, low, high }) as u32);

        AaddRef {
            c: quantize(c),
            b: quantize(b),
            node,
        }
    }

    fn normalize_edge(&self, edge: AffineEdge, b: f64, c: f64) -> AffineEdge {
        let mut ec = quantize(edge.c / c);
        if ec <= EPSILON {
            ec = 0.0;
        }
        let eb = quantize((edge.b - b) / c);
        debug_assert!(
            edge.target != self.terminal || ec == 0.0,
            "Terminal edges must carry c == 0"
        );
        AffineEdge {
            c: ec,
            b: eb,
            target: edge.target,
        }
    }

    /// Compose the outer factors of `r` onto one of its node's edges, giving
    /// the co-factor reference.
    fn compose(&mut self, r: AaddRef, edge: AffineEdge) -> NodeId {
        self.intern(r.c * edge.c, r.c * edge.b + r.b, edge.target)
    }

    /// The generic binary combinator over references.
    ///
    /// Comparisons are computed as the affine difference followed by a sign
    /// walk that opens the diagram only down to levels where the sign is
    /// constant.
    pub fn apply(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId {
        if op.is_comparison() {
            let diff = self.apply_arith(f, g, BinOp::Minus);
            return self.sign_walk(diff, op);
        }
        self.apply_arith(f, g, op)
    }

    fn apply_arith(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId {
        debug!("apply(f = {}, g = {}, op = {})", f, g, op);

        let fr = self.reference(f);
        let gr = self.reference(g);

        // Terminal references evaluate directly (their value is the offset).
        if fr.node == self.terminal && gr.node == self.terminal {
            let value = op.eval(fr.b, gr.b);
            return self.get_constant_node(value);
        }

        if let Some(res) = self.apply_shortcut(f, fr, g, gr, op) {
            debug!("apply: shortcut {} {} {} -> {}", f, op, g, res);
            return res;
        }

        let key = if op.is_commutative() && g < f {
            (op, g, f)
        } else {
            (op, f, g)
        };
        if let Some(&res) = self.apply_cache.get(&key) {
            return res;
        }

        let level = self.node_level(fr.node).min(self.node_level(gr.node));
        let var = self.order.var_at(level);
        let (f0, f1) = self.cofactors(fr, level);
        let (g0, g1) = self.cofactors(gr, level);

        let low = self.apply_arith(f0, g0, op);
        let high = self.apply_arith(f1, g1, op);
        let low = self.edge_of(low);
        let high = self.edge_of(high);
        let r = self.mk(var, low, high);
        let res = self.intern_ref(r);

        self.apply_cache.insert(key, res);
        res
    }

    fn edge_of(&self, id: NodeId) -> AffineEdge {
        let r = self.reference(id);
        AffineEdge {
            c: r.c,
            b: r.b,
            target: r.node,
        }
    }

    fn cofactors(&mut self, r: AaddRef, level: usize) -> (NodeId, NodeId) {
        match self.node(r.node) {
            AaddNode::Internal { var, low, high } if self.order.level(var) == level => {
                (self.compose(r, low), self.compose(r, high))
            }
            _ => {
                let id = self.intern_ref(r);
                (id, id)
            }
        }
    }

    /// Affine decompositions and bounds short-circuits that avoid opening the
    /// operands.
    fn apply_shortcut(
        &mut self,
        f: NodeId,
        fr: AaddRef,
        g: NodeId,
        gr: AaddRef,
        op: BinOp,
    ) -> Option<NodeId> {
        let f_const = fr.node == self.terminal;
        let g_const = gr.node == self.terminal;
        match op {
            BinOp::Sum => {
                if f_const {
                    return Some(self.intern(gr.c, gr.b + fr.b, gr.node));
                }
                if g_const {
                    return Some(self.intern(fr.c, fr.b + gr.b, fr.node));
                }
                if f == g {
                    return Some(self.intern(2.0 * fr.c, 2.0 * fr.b, fr.node));
                }
            }
            BinOp::Minus => {
                if f == g {
                    return Some(self.get_constant_node(0.0));
                }
                // f - k is a pure offset; k - f would need a negative scale
                // and must open the operand.
                if g_const {
                    return Some(self.intern(fr.c, fr.b - gr.b, fr.node));
                }
            }
            BinOp::Prod => {
                if f_const {
                    if fr.b.abs() <= EPSILON {
                        return Some(self.get_constant_node(0.0));
                    }
                    if fr.b > 0.0 {
                        return Some(self.intern(fr.b * gr.c, fr.b * gr.b, gr.node));
                    }
                }
                if g_const {
                    if gr.b.abs() <= EPSILON {
                        return Some(self.get_constant_node(0.0));
                    }
                    if gr.b > 0.0 {
                        return Some(self.intern(gr.b * fr.c, gr.b * fr.b, fr.node));
                    }
                }
            }
            BinOp::Div => {
                if g_const {
                    if gr.b.abs() <= EPSILON {
                        panic!("Division by a diagram containing the terminal 0");
                    }
                    if gr.b > 0.0 {
                        return Some(self.intern(fr.c / gr.b, fr.b / gr.b, fr.node));
                    }
                }
            }
            BinOp::Min | BinOp::Max => {
                if f == g {
                    return Some(f);
                }
                let (fmin, fmax) = (fr.b, fr.b + fr.c);
                let (gmin, gmax) = (gr.b, gr.b + gr.c);
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
            _ => unreachable!("comparisons go through sign_walk"),
        }
        None
    }

    /// Turn the signed range of `diff` into a 0/1 indicator, opening nodes
    /// only while the comparison is still undecided on the range.
    fn sign_walk(&mut self, diff: NodeId, op: BinOp) -> NodeId {
        let r = self.reference(diff);
        let min = r.b;
        let max = r.b + r.c;

        let zero_min = approx_eq(min, 0.0);
        let zero_max = approx_eq(max, 0.0);
        let decided = match op {
            BinOp::Greater => {
                if min > 0.0 && !zero_min {
                    Some(true)
                } else if max < 0.0 || zero_max {
                    Some(false)
                } else {
                    None
                }
            }
            BinOp::GreaterEq => {
                if min > 0.0 || zero_min {
                    Some(true)
                } else if max < 0.0 && !zero_max {
                    Some(false)
                } else {
                    None
                }
            }
            BinOp::Less => {
                if max < 0.0 && !zero_max {
                    Some(true)
                } else if min > 0.0 || zero_min {
                    Some(false)
                } else {
                    None
                }
            }
            BinOp::LessEq => {
                if max < 0.0 || zero_max {
                    Some(true)
                } else if min > 0.0 && !zero_min {
                    Some(false)
                } else {
                    None
                }
            }
            BinOp::Eq => {
                if zero_min && zero_max {
                    Some(true)
                } else if (min > 0.0 && !zero_min) || (max < 0.0 && !zero_max) {
                    Some(false)
                } else {
                    None
                }
            }
            BinOp::NotEq => {
                if zero_min && zero_max {
                    Some(false)
                } else if (min > 0.0 && !zero_min) || (max < 0.0 && !zero_max) {
                    Some(true)
                } else {
                    None
                }
            }
            _ => unreachable!("not a comparison: {}", op),
        };
        if let Some(truth) = decided {
            return self.get_constant_node(if truth { 1.0 } else { 0.0 });
        }
        debug_assert!(r.node != self.terminal, "Undecided sign on a constant");

        let key = (op, diff);
        if let Some(&res) = self.sign_cache.get(&key) {
            return res;
        }

        let (var, low_edge, high_edge) = match self.node(r.node) {
            AaddNode::Internal { var, low, high } => (var, low, high),
            AaddNode::Terminal => unreachable!(),
        };
        let low_id = self.compose(r, low_edge);
        let high_id = self.compose(r, high_edge);
        let low = self.sign_walk(low_id, op);
        let high = self.sign_walk(high_id, op);
        let low = self.edge_of(low);
        let high = self.edge_of(high);
        let res = self.mk(var, low, high);
        let res = self.intern_ref(res);

        self.sign_cache.insert(key, res);
        res
    }

    /// Substitute `var := value` in the reference `f`.
    ///
    /// As in the ADD engine, restricting a variable that does not occur is the
    /// identity.
    pub fn restrict(&mut self, f: NodeId, var: VarId, value: bool) -> NodeId {
        let r = self.reference(f);
        let inner = self.restrict_node(r.node, var, value);
        let inner = self.reference(inner);
        self.intern(r.c * inner.c, r.c * inner.b + r.b, inner.node)
    }

    /// Node-relative restriction (scale-invariant, cached per node).
    fn restrict_node(&mut self, node: NodeId, var: VarId, value: bool) -> NodeId {
        let target = self.order.level(var);
        let level = self.node_level(node);

        if level > target {
            // The variable cannot occur below this node; the node stands for
            // itself with unit factors (the terminal for the constant 0).
            return if node == self.terminal {
                self.intern(0.0, 0.0, node)
            } else {
                self.intern(1.0, 0.0, node)
            };
        }

        let (v, low, high) = match self.node(node) {
            AaddNode::Internal { var, low, high } => (var, low, high),
            AaddNode::Terminal => unreachable!("terminals sit at the deepest level"),
        };

        if level == target {
            let edge = if value { high } else { low };
            return self.intern(edge.c, edge.b, edge.target);
        }

        let key = (node, var, value);
        if let Some(&res) = self.restrict_cache.get(&key) {
            return res;
        }

        let low_id = self.restrict_node(low.target, var, value);
        let high_id = self.restrict_node(high.target, var, value);
        let low_inner = self.reference(low_id);
        let high_inner = self.reference(high_id);
        let low = AffineEdge::new(
            low.c * low_inner.c,
            low.c * low_inner.b + low.b,
            low_inner.node,
        );
        let high = AffineEdge::new(
            high.c * high_inner.c,
            high.c * high_inner.b + high.b,
            high_inner.node,
        );
        let r = self.mk(v, low, high);
        let res = self.intern_ref(r);

        self.restrict_cache.insert(key, res);
        res
    }

    /// Evaluate the reference `f` under a complete assignment indexed by level.
    pub fn evaluate(&self, f: NodeId, assignment: &[bool]) -> f64 {
        let r = self.reference(f);
        r.b + r.c * self.evaluate_node(r.node, assignment)
    }

    fn evaluate_node(&self, node: NodeId, assignment: &[bool]) -> f64 {
        match self.node(node) {
            AaddNode::Terminal => 0.0,
            AaddNode::Internal { var, low, high } => {
                let edge = if assignment[self.order.level(var)] {
                    high
                } else {
                    low
                };
                edge.b + edge.c * self.evaluate_node(edge.target, assignment)
            }
        }
    }

    /// All distinct node-table entries reachable from the given nodes.
    pub(crate) fn descendant_nodes(&self, roots: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        let mut result = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            result.push(id);
            if let AaddNode::Internal { low, high, .. } = self.node(id) {
                stack.push(low.target);
                stack.push(high.target);
            }
        }
        result
    }

    /// Number of distinct nodes in the DAG below the reference `f` (terminal
    /// included).
    pub fn count_exact_nodes(&self, f: NodeId) -> usize {
        let r = self.reference(f);
        self.descendant_nodes([r.node]).len()
    }

    /// Render `f` as a bracket string with explicit affine factors:
    /// `<c, b> @id:(xV, <..> high, <..> low)`, the terminal as `T`.
    pub fn print_node(&self, f: NodeId) -> String {
        let r = self.reference(f);
        format!("<{}, {}> {}", r.c, r.b, self.print_inner(r.node))
    }

    fn print_inner(&self, node: NodeId) -> String {
        match self.node(node) {
            AaddNode::Terminal => "T".to_string(),
            AaddNode::Internal { var, low, high } => format!(
                "{}:({}, <{}, {}> {}, <{}, {}> {})",
                node,
                var,
                high.c,
                high.b,
                self.print_inner(high.target),
                low.c,
                low.b,
                self.print_inner(low.target)
            ),
        }
    }

    /// Anchor the reference `f` against cache flushes (refcounted).
    pub fn add_special_node(&mut self, f: NodeId) {
        assert!(self.refs.is_occupied(f.index()), "Unknown reference {}", f);
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
            None => panic!("Reference {} is not special", f),
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

    /// Clear all operation caches, drop every non-anchored reference and every
    /// node unreachable from a surviving reference. Surviving identifiers are
    /// stable; the canonical terminal always survives.
    pub fn flush_caches(&mut self, rebuild_hash_cons: bool) {
        self.apply_cache.clear();
        self.sign_cache.clear();
        self.restrict_cache.clear();

        let doomed_refs: Vec<usize> = self
            .refs
            .indices()
            .filter(|&i| !self.special.contains_key(&NodeId::new(i as u32)))
            .collect();
        for &i in &doomed_refs {
            self.refs.drop_cell(i);
        }

        let mut roots: Vec<NodeId> = vec![self.terminal];
        roots.extend(self.refs.indices().map(|i| {
            let r: AaddRef = self.refs.value(i);
            r.node
        }));
        let reachable: HashSet<NodeId> = self.descendant_nodes(roots).into_iter().collect();

        let doomed_nodes: Vec<usize> = self
            .nodes
            .indices()
            .filter(|&i| !reachable.contains(&NodeId::new(i as u32)))
            .collect();
        for &i in &doomed_nodes {
            self.nodes.drop_cell(i);
        }

        if !doomed_refs.is_empty() || rebuild_hash_cons {
            self.refs.rebuild();
        }
        if !doomed_nodes.is_empty() || rebuild_hash_cons {
            self.nodes.rebuild();
        }
        debug!(
            "flush: dropped {} refs and {} nodes, {} nodes remain",
            doomed_refs.len(),
            doomed_nodes.len(),
            self.nodes.real_size()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator_sum(aadd: &mut Aadd, n: u32) -> NodeId {
        let mut f = aadd.get_constant_node(0.0);
        for i in 1..=n {
            let x = aadd.get_var_node(VarId::new(i), 0.0, 1.0);
            f = aadd.apply(f, x, BinOp::Sum);
        }
        f
    }

    #[test]
    fn test_constant_references() {
        let mut aadd = Aadd::new(VarOrder::numbered(3));
        let a = aadd.get_constant_node(2.5);
        let b = aadd.get_constant_node(2.5 + 1e-13);
        assert_eq!(a, b);
        assert_eq!(aadd.min_value(a), 2.5);
        assert_eq!(aadd.max_value(a), 2.5);
    }

    #[test]
    fn test_var_node_normalization() {
        let mut aadd = Aadd::new(VarOrder::numbered(3));
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        let r = aadd.reference(x);
        assert_eq!(r.c, 1.0);
        assert_eq!(r.b, 0.0);

        // 3 + 2x shares the indicator's node with shifted outer factors.
        let y = aadd.get_var_node(VarId::new(1), 3.0, 5.0);
        let ry = aadd.reference(y);
        assert_eq!(ry.node, r.node);
        assert_eq!(ry.c, 2.0);
        assert_eq!(ry.b, 3.0);
    }

    #[test]
    fn test_affine_sharing_across_construction() {
        let mut aadd = Aadd::new(VarOrder::numbered(3));
        // 5 - x built by opening, 1 - x shifted by 4: same node.
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        let five = aadd.get_constant_node(5.0);
        let one = aadd.get_constant_node(1.0);
        let four = aadd.get_constant_node(4.0);

        let a = aadd.apply(five, x, BinOp::Minus);
        let not_x = aadd.apply(one, x, BinOp::Minus);
        let b = aadd.apply(not_x, four, BinOp::Sum);
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_invariants() {
        let mut aadd = Aadd::new(VarOrder::numbered(6));
        let f = indicator_sum(&mut aadd, 5);
        let r = aadd.reference(f);
        for node in aadd.descendant_nodes([r.node]) {
            if let AaddNode::Internal { low, high, .. } = aadd.node(node) {
                assert!(approx_eq(low.b.min(high.b), 0.0));
                assert!(approx_eq((low.c + low.b).max(high.c + high.b), 1.0));
                assert!(low.c >= 0.0 && high.c >= 0.0);
            }
        }
    }

    #[test]
    fn test_sum_indicator_shares_levels() {
        let mut aadd = Aadd::new(VarOrder::numbered(10));
        let f = indicator_sum(&mut aadd, 5);
        assert_eq!(aadd.min_value(f), 0.0);
        assert_eq!(aadd.max_value(f), 5.0);
        // One internal node per level plus the terminal.
        assert_eq!(aadd.count_exact_nodes(f), 6);
    }

    #[test]
    fn test_evaluate() {
        let mut aadd = Aadd::new(VarOrder::numbered(5));
        let f = indicator_sum(&mut aadd, 5);
        // The normalized edge constants are quantized (2/3 becomes
        // 0.6666666667), so evaluation carries a relative-epsilon drift.
        let mut a = vec![false; 5];
        assert!(approx_eq(aadd.evaluate(f, &a), 0.0));
        a[1] = true;
        a[3] = true;
        assert!(approx_eq(aadd.evaluate(f, &a), 2.0));
        a.fill(true);
        assert!(approx_eq(aadd.evaluate(f, &a), 5.0));
    }

    #[test]
    fn test_threshold_indicator() {
        let mut aadd = Aadd::new(VarOrder::numbered(10));
        let f = indicator_sum(&mut aadd, 5);
        let three = aadd.get_constant_node(3.0);
        let g = aadd.apply(f, three, BinOp::GreaterEq);

        assert_eq!(aadd.min_value(g), 0.0);
        assert_eq!(aadd.max_value(g), 1.0);

        let mut a = vec![false; 10];
        a[0] = true;
        a[2] = true;
        assert_eq!(aadd.evaluate(g, &a), 0.0);
        a[4] = true;
        assert_eq!(aadd.evaluate(g, &a), 1.0);
    }

    #[test]
    fn test_apply_identities() {
        let mut aadd = Aadd::new(VarOrder::numbered(4));
        let f = indicator_sum(&mut aadd, 3);
        let zero = aadd.get_constant_node(0.0);
        let one = aadd.get_constant_node(1.0);

        assert_eq!(aadd.apply(f, zero, BinOp::Sum), f);
        assert_eq!(aadd.apply(f, one, BinOp::Prod), f);
        assert_eq!(aadd.apply(f, f, BinOp::Minus), zero);

        let fg = aadd.apply(f, one, BinOp::Sum);
        let back = aadd.apply(fg, one, BinOp::Minus);
        assert_eq!(back, f);
    }

    #[test]
    fn test_sum_commutes() {
        let mut aadd = Aadd::new(VarOrder::numbered(4));
        let f = aadd.get_var_node(VarId::new(1), 0.0, 2.0);
        let g = aadd.get_var_node(VarId::new(3), 1.0, 4.0);
        assert_eq!(aadd.apply(f, g, BinOp::Sum), aadd.apply(g, f, BinOp::Sum));
    }

    #[test]
    fn test_product_by_negative_constant_opens() {
        let mut aadd = Aadd::new(VarOrder::numbered(2));
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        let minus2 = aadd.get_constant_node(-2.0);
        let f = aadd.apply(x, minus2, BinOp::Prod);
        assert_eq!(aadd.min_value(f), -2.0);
        assert_eq!(aadd.max_value(f), 0.0);
        assert_eq!(aadd.evaluate(f, &[true, false]), -2.0);
        assert_eq!(aadd.evaluate(f, &[false, false]), 0.0);
    }

    #[test]
    fn test_restrict() {
        let mut aadd = Aadd::new(VarOrder::numbered(4));
        let f = indicator_sum(&mut aadd, 3);
        let r1 = aadd.restrict(f, VarId::new(2), true);
        assert_eq!(aadd.min_value(r1), 1.0);
        assert_eq!(aadd.max_value(r1), 3.0);

        // Double restriction of the same variable is the identity on the
        // first result.
        let r0 = aadd.restrict(f, VarId::new(2), false);
        assert_eq!(aadd.restrict(r0, VarId::new(2), true), r0);
    }

    #[test]
    fn test_entailment_products() {
        // shaving-style test: (x1 >= 1) * (1 - x1) is identically 0.
        let mut aadd = Aadd::new(VarOrder::numbered(2));
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        let one = aadd.get_constant_node(1.0);
        let not_x = aadd.apply(one, x, BinOp::Minus);
        let c = aadd.apply(x, one, BinOp::GreaterEq);
        let t = aadd.apply(c, not_x, BinOp::Prod);
        assert_eq!(aadd.max_value(t), 0.0);
    }

    #[test]
    #[should_panic(expected = "Division by a diagram containing the terminal 0")]
    fn test_division_by_zero_constant() {
        let mut aadd = Aadd::new(VarOrder::numbered(2));
        let f = aadd.get_constant_node(6.0);
        let zero = aadd.get_constant_node(0.0);
        aadd.apply(f, zero, BinOp::Div);
    }

    #[test]
    fn test_flush_keeps_anchored_reference() {
        let mut aadd = Aadd::new(VarOrder::numbered(6));
        let f = indicator_sum(&mut aadd, 4);
        aadd.add_special_node(f);

        let _garbage = indicator_sum(&mut aadd, 6);
        let nodes_before = aadd.num_nodes();
        let refs_before = aadd.num_refs();

        aadd.flush_caches(false);
        assert!(aadd.num_nodes() < nodes_before);
        assert!(aadd.num_refs() < refs_before);

        assert_eq!(aadd.min_value(f), 0.0);
        assert_eq!(aadd.max_value(f), 4.0);
        let f2 = indicator_sum(&mut aadd, 4);
        assert_eq!(f2, f);

        aadd.remove_special_node(f);
        assert!(!aadd.is_special(f));
    }

    #[test]
    #[should_panic(expected = "is not special")]
    fn test_unbalanced_anchor_panics() {
        let mut aadd = Aadd::new(VarOrder::numbered(2));
        let x = aadd.get_var_node(VarId::new(1), 0.0, 1.0);
        aadd.remove_special_node(x);
    }
}

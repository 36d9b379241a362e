//! The common store surface of the two diagram engines.
//!
//! [`DecisionDiagram`] is the interface the propagators program against: both
//! the [`Add`][crate::add::Add] and the [`Aadd`][crate::aadd::Aadd] manager
//! expose canonical construction, the generic `apply`, restriction, range
//! bounds, root anchoring, pruning, cache flushing and diagnostics through it.

use crate::aadd::Aadd;
use crate::add::Add;
use crate::op::BinOp;
use crate::order::VarOrder;
use crate::prune::PruneMode;
use crate::types::{NodeId, VarId};

pub trait DecisionDiagram {
    /// The variable ordering all diagrams of this store share.
    fn order(&self) -> &VarOrder;

    /// Canonical terminal for `value` (within the store tolerance).
    fn get_constant_node(&mut self, value: f64) -> NodeId;

    /// The leaf-valued variable diagram `v ? high_val : low_val`.
    fn get_var_node(&mut self, var: VarId, low_val: f64, high_val: f64) -> NodeId;

    /// The generic binary combinator.
    fn apply(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId;

    /// Substitute `var := value` (`true` selects the high branch).
    fn restrict(&mut self, f: NodeId, var: VarId, value: bool) -> NodeId;

    fn min_value(&self, f: NodeId) -> f64;
    fn max_value(&self, f: NodeId) -> f64;

    /// Anchor `f` against cache flushes (refcounted).
    fn add_special_node(&mut self, f: NodeId);
    /// Drop one anchor of `f`; panics when unbalanced.
    fn remove_special_node(&mut self, f: NodeId);

    /// Configure [`prune_nodes`][DecisionDiagram::prune_nodes].
    fn set_prune_info(&mut self, mode: PruneMode, max_error: f64);
    /// Bounded-error sub-diagram replacement.
    fn prune_nodes(&mut self, f: NodeId) -> NodeId;

    /// Clear operation caches and reclaim everything unreachable from an
    /// anchor.
    fn flush_caches(&mut self, rebuild_hash_cons: bool);

    /// Number of distinct nodes of the rooted DAG.
    fn count_exact_nodes(&self, f: NodeId) -> usize;

    /// Human-readable bracket rendering.
    fn print_node(&self, f: NodeId) -> String;

    /// DOT export of the rooted DAG, suitable for Graphviz.
    fn to_dot(&self, roots: &[NodeId]) -> Result<String, std::fmt::Error>;

    /// Evaluate under a complete assignment indexed by level.
    fn evaluate(&self, f: NodeId, assignment: &[bool]) -> f64;

    /// Truth-table dump for small orders, one line per assignment.
    ///
    /// # Panics
    ///
    /// Panics when the order has more than 20 variables.
    fn tabulate(&self, f: NodeId) -> String {
        let n = self.order().len();
        assert!(n <= 20, "tabulate is limited to 20 variables");
        let mut out = String::new();
        for bits in 0..1u32 << n {
            let assignment: Vec<bool> = (0..n).map(|i| bits >> i & 1 == 1).collect();
            for &value in &assignment {
                out.push(if value { '1' } else { '0' });
                out.push(' ');
            }
            out.push_str(&format!("| {}\n", self.evaluate(f, &assignment)));
        }
        out
    }
}

impl DecisionDiagram for Add {
    fn order(&self) -> &VarOrder {
        Add::order(self)
    }
    fn get_constant_node(&mut self, value: f64) -> NodeId {
        Add::get_constant_node(self, value)
    }
    fn get_var_node(&mut self, var: VarId, low_val: f64, high_val: f64) -> NodeId {
        Add::get_var_node(self, var, low_val, high_val)
    }
    fn apply(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId {
        Add::apply(self, f, g, op)
    }
    fn restrict(&mut self, f: NodeId, var: VarId, value: bool) -> NodeId {
        Add::restrict(self, f, var, value)
    }
    fn min_value(&self, f: NodeId) -> f64 {
        Add::min_value(self, f)
    }
    fn max_value(&self, f: NodeId) -> f64 {
        Add::max_value(self, f)
    }
    fn add_special_node(&mut self, f: NodeId) {
        Add::add_special_node(self, f)
    }
    fn remove_special_node(&mut self, f: NodeId) {
        Add::remove_special_node(self, f)
    }
    fn set_prune_info(&mut self, mode: PruneMode, max_error: f64) {
        Add::set_prune_info(self, mode, max_error)
    }
    fn prune_nodes(&mut self, f: NodeId) -> NodeId {
        Add::prune_nodes(self, f)
    }
    fn flush_caches(&mut self, rebuild_hash_cons: bool) {
        Add::flush_caches(self, rebuild_hash_cons)
    }
    fn count_exact_nodes(&self, f: NodeId) -> usize {
        Add::count_exact_nodes(self, f)
    }
    fn print_node(&self, f: NodeId) -> String {
        Add::print_node(self, f)
    }
    fn to_dot(&self, roots: &[NodeId]) -> Result<String, std::fmt::Error> {
        Add::to_dot(self, roots)
    }
    fn evaluate(&self, f: NodeId, assignment: &[bool]) -> f64 {
        Add::evaluate(self, f, assignment)
    }
}

impl DecisionDiagram for Aadd {
    fn order(&self) -> &VarOrder {
        Aadd::order(self)
    }
    fn get_constant_node(&mut self, value: f64) -> NodeId {
        Aadd::get_constant_node(self, value)
    }
    fn get_var_node(&mut self, var: VarId, low_val: f64, high_val: f64) -> NodeId {
        Aadd::get_var_node(self, var, low_val, high_val)
    }
    fn apply(&mut self, f: NodeId, g: NodeId, op: BinOp) -> NodeId {
        Aadd::apply(self, f, g, op)
    }
    fn restrict(&mut self, f: NodeId, var: VarId, value: bool) -> NodeId {
        Aadd::restrict(self, f, var, value)
    }
    fn min_value(&self, f: NodeId) -> f64 {
        Aadd::min_value(self, f)
    }
    fn max_value(&self, f: NodeId) -> f64 {
        Aadd::max_value(self, f)
    }
    fn add_special_node(&mut self, f: NodeId) {
        Aadd::add_special_node(self, f)
    }
    fn remove_special_node(&mut self, f: NodeId) {
        Aadd::remove_special_node(self, f)
    }
    fn set_prune_info(&mut self, mode: PruneMode, max_error: f64) {
        Aadd::set_prune_info(self, mode, max_error)
    }
    fn prune_nodes(&mut self, f: NodeId) -> NodeId {
        Aadd::prune_nodes(self, f)
    }
    fn flush_caches(&mut self, rebuild_hash_cons: bool) {
        Aadd::flush_caches(self, rebuild_hash_cons)
    }
    fn count_exact_nodes(&self, f: NodeId) -> usize {
        Aadd::count_exact_nodes(self, f)
    }
    fn print_node(&self, f: NodeId) -> String {
        Aadd::print_node(self, f)
    }
    fn to_dot(&self, roots: &[NodeId]) -> Result<String, std::fmt::Error> {
        Aadd::to_dot(self, roots)
    }
    fn evaluate(&self, f: NodeId, assignment: &[bool]) -> f64 {
        Aadd::evaluate(self, f, assignment)
    }
}

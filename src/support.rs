//! The ADD-specific propagator: one depth-first traversal per call.
//!
//! Instead of testing every unfixed variable with two indicator products, an
//! [`AddPropagator`] walks the diagram once under the current partial
//! assignment and marks, for every variable `x_k` and value `b`, whether some
//! path through `x_k = b` still reaches a 1 terminal. Unsupported values are
//! removed from the host domains.
//!
//! Skipped levels are exploited: an edge jumping from level `l` to level
//! `l + m` supports both values of every level in between, and an edge into a
//! constant sub-diagram supports both values of every deeper level. Host
//! instantiations are afterwards folded into the root via `restrict`, with
//! the same anchoring and trail discipline as the generic propagator.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use log::debug;

use crate::add::Add;
use crate::solver::{
    BoolVar, Contradiction, Entailment, PropagationContext, Propagator, Restorer,
};
use crate::types::{NodeId, VarId};
use crate::utils::approx_eq;

pub struct AddPropagator {
    dd: Rc<RefCell<Add>>,
    root: NodeId,
    /// Host variables, in the diagram's variable order.
    vars: Vec<BoolVar>,
    /// The diagram variable behind each host variable.
    dd_vars: Vec<VarId>,
    /// `seen[k]`: the instantiation of `vars[k]` is already folded into the root.
    seen: Vec<bool>,
    /// Diagram level -> local variable index.
    level_to_k: Vec<Option<usize>>,
}

impl AddPropagator {
    /// Post the constraint "`root` is 1" over `vars`.
    pub fn new(
        dd: Rc<RefCell<Add>>,
        root: NodeId,
        vars: Vec<BoolVar>,
        dd_vars: Vec<VarId>,
    ) -> Self {
        assert_eq!(
            vars.len(),
            dd_vars.len(),
            "One diagram variable per host variable"
        );

        let level_to_k = {
            let mut store = dd.borrow_mut();
            store.add_special_node(root);

            let mut level_to_k = vec![None; store.order().len()];
            let mut last_level = None;
            for (k, &v) in dd_vars.iter().enumerate() {
                let level = store.order().level(v);
                assert!(
                    last_level.map_or(true, |prev| prev < level),
                    "Variables must follow the diagram order"
                );
                last_level = Some(level);
                level_to_k[level] = Some(k);
            }
            level_to_k
        };

        let n = vars.len();
        Self {
            dd,
            root,
            vars,
            dd_vars,
            seen: vec![false; n],
            level_to_k,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn seen(&self) -> &[bool] {
        &self.seen
    }

    /// Whether a 1 terminal is reachable from `node` under the current
    /// partial assignment, marking value supports along the way.
    fn dfs(
        &self,
        dd: &Add,
        ctx: &PropagationContext<'_>,
        node: NodeId,
        support: &mut [[bool; 2]],
        reach: &mut HashMap<NodeId, bool>,
    ) -> bool {
        if approx_eq(dd.max_value(node), 0.0) {
            return false;
        }
        if approx_eq(dd.min_value(node), 1.0) {
            return true;
        }
        if dd.is_terminal(node) {
            return true;
        }
        if let Some(&r) = reach.get(&node) {
            return r;
        }

        let level = dd.level(node);
        let k = self.level_to_k[level].expect("diagram variable outside the propagator scope");
        let var = self.vars[k];
        let low = dd.low(node);
        let high = dd.high(node);

        let r = if ctx.is_instantiated(var) {
            // Only the matching branch exists under the assignment.
            let value = ctx.value(var);
            let child = if value { high } else { low };
            let r = self.dfs(dd, ctx, child, support, reach);
            if r {
                support[k][value as usize] = true;
                self.mark_skipped(dd, level + 1, child, support);
            }
            r
        } else {
            let r_low = self.dfs(dd, ctx, low, support, reach);
            let r_high = self.dfs(dd, ctx, high, support, reach);
            if r_low {
                support[k][0] = true;
                self.mark_skipped(dd, level + 1, low, support);
            }
            if r_high {
                support[k][1] = true;
                self.mark_skipped(dd, level + 1, high, support);
            }
            r_low || r_high
        };
        let _ = reach.insert(node, r);
        r
    }

    /// A supporting edge into `child` also supports both values of every
    /// level from `begin` up to the child (to the bottom for constant
    /// sub-diagrams).
    fn mark_skipped(&self, dd: &Add, begin: usize, child: NodeId, support: &mut [[bool; 2]]) {
        let end = if dd.is_terminal(child)
            || approx_eq(dd.min_value(child), 1.0)
            || approx_eq(dd.max_value(child), 0.0)
        {
            self.level_to_k.len()
        } else {
            dd.level(child)
        };
        for level in begin..end {
            if let Some(k) = self.level_to_k[level] {
                support[k] = [true, true];
            }
        }
    }
}

impl Propagator for AddPropagator {
    fn propagate(&mut self, ctx: &mut PropagationContext<'_>) -> Result<(), Contradiction> {
        if self.is_entailed() == Entailment::False {
            return Err(Contradiction);
        }

        let n = self.vars.len();
        let mut support = vec![[false; 2]; n];
        let root_ok = {
            let dd = self.dd.borrow();
            let mut reach = HashMap::new();
            let ok = self.dfs(&dd, ctx, self.root, &mut support, &mut reach);
            if ok {
                // Levels above the root are unconstrained.
                self.mark_skipped(&dd, 0, self.root, &mut support);
            }
            ok
        };
        if !root_ok {
            return Err(Contradiction);
        }

        // Fold host instantiations known at traversal time into the root.
        for k in 0..n {
            if self.seen[k] || !ctx.is_instantiated(self.vars[k]) {
                continue;
            }
            let value = ctx.value(self.vars[k]);
            let old = self.root;
            {
                let mut dd = self.dd.borrow_mut();
                let new = dd.restrict(old, self.dd_vars[k], value);
                dd.add_special_node(new);
                self.root = new;
                if ctx.world_index() <= 1 {
                    dd.remove_special_node(old);
                }
            }
            self.seen[k] = true;
            if ctx.world_index() > 1 {
                ctx.save(Restorer::ClearSeen { k });
                ctx.save(Restorer::RestoreRoot { root: old });
            }
            debug!("fold {} := {} -> root {}", self.dd_vars[k], value, self.root);
        }

        // Remove values with no supporting path.
        for k in 0..n {
            if ctx.is_instantiated(self.vars[k]) {
                continue;
            }
            for value in [false, true] {
                if !support[k][value as usize] {
                    debug!("no support for {} = {}", self.dd_vars[k], value);
                    ctx.remove_value(self.vars[k], value)?;
                }
            }
        }

        self.dd.borrow_mut().flush_caches(false);
        Ok(())
    }

    fn is_entailed(&self) -> Entailment {
        let dd = self.dd.borrow();
        if approx_eq(dd.min_value(self.root), 1.0) {
            Entailment::True
        } else if approx_eq(dd.max_value(self.root), 0.0) {
            Entailment::False
        } else {
            Entailment::Undefined
        }
    }

    fn restore(&mut self, restorer: Restorer) {
        match restorer {
            Restorer::RestoreRoot { root } => {
                let mut dd = self.dd.borrow_mut();
                dd.remove_special_node(self.root);
                dd.flush_caches(false);
                self.root = root;
            }
            Restorer::ClearSeen { k } => self.seen[k] = false,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinOp;
    use crate::order::VarOrder;
    use crate::solver::Model;

    /// Post `sum of selected vars >= threshold` over fresh host variables
    /// spanning the whole order.
    fn post_sum_constraint(
        model: &mut Model,
        store: Rc<RefCell<Add>>,
        selected: &[u32],
        n: u32,
        threshold: f64,
    ) -> (usize, Vec<BoolVar>) {
        let (root, dd_vars) = {
            let mut dd = store.borrow_mut();
            let mut f = dd.get_constant_node(0.0);
            let mut dd_vars = Vec::new();
            for i in 1..=n {
                let v = VarId::new(i);
                if selected.contains(&i) {
                    let x = dd.get_var_node(v, 0.0, 1.0);
                    f = dd.apply(f, x, BinOp::Sum);
                }
                dd_vars.push(v);
            }
            let t = dd.get_constant_node(threshold);
            (dd.apply(f, t, BinOp::GreaterEq), dd_vars)
        };
        let vars: Vec<BoolVar> = (0..n).map(|_| model.new_bool_var()).collect();
        let prop = AddPropagator::new(store, root, vars.clone(), dd_vars);
        let id = model.post(Box::new(prop));
        (id, vars)
    }

    #[test]
    fn test_forced_values_are_propagated() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(3))));
        // x1 + x2 + x3 >= 3.
        let (_, vars) = post_sum_constraint(&mut model, store, &[1, 2, 3], 3, 3.0);
        model.propagate().unwrap();
        for &v in &vars {
            assert!(model.value(v));
        }
    }

    #[test]
    fn test_skipped_levels_keep_support() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(3))));
        // x1 + x3 >= 1: x2 never occurs in the diagram.
        let (_, vars) = post_sum_constraint(&mut model, store, &[1, 3], 3, 1.0);
        model.propagate().unwrap();
        // Nothing is decided yet, in particular not the skipped x2.
        for &v in &vars {
            assert!(!model.is_instantiated(v));
        }

        model.new_world();
        model.instantiate(vars[0], false).unwrap();
        model.propagate().unwrap();
        assert!(!model.is_instantiated(vars[1]));
        assert!(model.value(vars[2]));
    }

    #[test]
    fn test_fold_via_restrict_reaches_entailment() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(2))));
        let (id, vars) = post_sum_constraint(&mut model, Rc::clone(&store), &[1, 2], 2, 1.0);
        model.propagate().unwrap();

        model.new_world();
        model.instantiate(vars[0], true).unwrap();
        model.propagate().unwrap();

        // restrict removed x1 from the root, leaving the tautology.
        let p = model
            .propagator(id)
            .as_any()
            .downcast_ref::<AddPropagator>()
            .unwrap();
        assert!(p.seen()[0]);
        assert_eq!(p.is_entailed(), Entailment::True);
    }

    #[test]
    fn test_backtrack_restores_root_and_seen() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(3))));
        let (id, vars) = post_sum_constraint(&mut model, Rc::clone(&store), &[1, 2, 3], 3, 2.0);
        model.propagate().unwrap();

        let (root0, seen0) = {
            let p = model
                .propagator(id)
                .as_any()
                .downcast_ref::<AddPropagator>()
                .unwrap();
            (p.root(), p.seen().to_vec())
        };

        model.new_world();
        model.instantiate(vars[0], false).unwrap();
        model.propagate().unwrap();
        model.backtrack();

        let p = model
            .propagator(id)
            .as_any()
            .downcast_ref::<AddPropagator>()
            .unwrap();
        assert_eq!(p.root(), root0);
        assert_eq!(p.seen(), &seen0[..]);

        // A second propagation after the backtrack is a no-op.
        model.propagate().unwrap();
        for &v in &vars {
            assert!(!model.is_instantiated(v));
        }
    }

    #[test]
    fn test_infeasible_after_decisions() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(2))));
        let (_, vars) = post_sum_constraint(&mut model, store, &[1, 2], 2, 1.0);
        model.propagate().unwrap();

        model.new_world();
        model.instantiate(vars[0], false).unwrap();
        model.instantiate(vars[1], false).unwrap();
        assert_eq!(model.propagate(), Err(Contradiction));
    }
}

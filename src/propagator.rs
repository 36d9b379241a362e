//! The diagram-based constraint propagator.
//!
//! A [`DdPropagator`] holds a 0/1-valued diagram root `r` and represents the
//! constraint "`r` evaluates to 1 under the current assignment". It works
//! against either engine through [`DecisionDiagram`]:
//!
//! 1. **Acknowledge**: every host variable instantiated since the last call
//!    is folded into `r` by multiplying with the variable's indicator (`x` or
//!    `1 − x`), in variable order. Each root update is anchored first and then
//!    trailed, so backtracking restores `r`, its anchor and the `seen` flag.
//! 2. **Shaving**: for every untouched variable both indicator products are
//!    tested; an identically-zero product forces the opposite value on the
//!    host, which re-enters acknowledge on the next fixpoint round.
//! 3. Temporaries are reclaimed by `flush_caches(false)` on the way out.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::dd::DecisionDiagram;
use crate::op::BinOp;
use crate::solver::{
    BoolVar, Contradiction, Entailment, PropagationContext, Propagator, Restorer,
};
use crate::types::{NodeId, VarId};
use crate::utils::approx_eq;

pub struct DdPropagator<D: DecisionDiagram> {
    dd: Rc<RefCell<D>>,
    root: NodeId,
    /// Host variables, in the diagram's variable order.
    vars: Vec<BoolVar>,
    /// The diagram variable behind each host variable.
    dd_vars: Vec<VarId>,
    /// `seen[k]`: the instantiation of `vars[k]` is already folded into the root.
    seen: Vec<bool>,
    /// Anchored indicator diagrams `x_k`.
    id_x: Vec<NodeId>,
    /// Anchored indicator diagrams `1 - x_k`.
    id_not_x: Vec<NodeId>,
}

impl<D: DecisionDiagram> DdPropagator<D> {
    /// Post the constraint "`root` is 1" over `vars`.
    ///
    /// `vars` and `dd_vars` pair up host variables with diagram variables and
    /// must follow the diagram's variable order. The root and both indicator
    /// diagrams of every variable are anchored for the propagator's lifetime.
    pub fn new(
        dd: Rc<RefCell<D>>,
        root: NodeId,
        vars: Vec<BoolVar>,
        dd_vars: Vec<VarId>,
    ) -> Self {
        assert_eq!(
            vars.len(),
            dd_vars.len(),
            "One diagram variable per host variable"
        );

        let n = vars.len();
        let mut id_x = Vec::with_capacity(n);
        let mut id_not_x = Vec::with_capacity(n);
        {
            let mut store = dd.borrow_mut();
            for window in dd_vars.windows(2) {
                assert!(
                    store.order().level(window[0]) < store.order().level(window[1]),
                    "Variables must follow the diagram order"
                );
            }
            store.add_special_node(root);
            let one = store.get_constant_node(1.0);
            for &v in &dd_vars {
                let x = store.get_var_node(v, 0.0, 1.0);
                store.add_special_node(x);
                let not_x = store.apply(one, x, BinOp::Minus);
                store.add_special_node(not_x);
                id_x.push(x);
                id_not_x.push(not_x);
            }
        }

        Self {
            dd,
            root,
            vars,
            dd_vars,
            seen: vec![false; n],
            id_x,
            id_not_x,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn seen(&self) -> &[bool] {
        &self.seen
    }

    pub fn store(&self) -> Rc<RefCell<D>> {
        Rc::clone(&self.dd)
    }

    /// Fold the instantiation of `vars[k]` into the root.
    ///
    /// The new root is anchored before the restorer records go on the trail;
    /// at the root world the update is permanent and the old anchor is
    /// released instead.
    fn fold_in(
        &mut self,
        ctx: &mut PropagationContext<'_>,
        k: usize,
        value: bool,
    ) -> Result<(), Contradiction> {
        let indicator = if value { self.id_x[k] } else { self.id_not_x[k] };
        let old = self.root;

        let max = {
            let mut dd = self.dd.borrow_mut();
            let new = dd.apply(old, indicator, BinOp::Prod);
            dd.add_special_node(new);
            self.root = new;
            if ctx.world_index() <= 1 {
                dd.remove_special_node(old);
            }
            dd.max_value(new)
        };
        self.seen[k] = true;
        if ctx.world_index() > 1 {
            ctx.save(Restorer::ClearSeen { k });
            ctx.save(Restorer::RestoreRoot { root: old });
        }
        debug!(
            "fold {} := {} -> root {} (max {})",
            self.dd_vars[k], value, self.root, max
        );

        if approx_eq(max, 0.0) {
            return Err(Contradiction);
        }
        Ok(())
    }
}

impl<D: DecisionDiagram + 'static> Propagator for DdPropagator<D> {
    fn propagate(&mut self, ctx: &mut PropagationContext<'_>) -> Result<(), Contradiction> {
        if self.is_entailed() == Entailment::False {
            return Err(Contradiction);
        }

        // Acknowledge newly instantiated variables, in diagram order.
        for k in 0..self.vars.len() {
            if !self.seen[k] && ctx.is_instantiated(self.vars[k]) {
                let value = ctx.value(self.vars[k]);
                self.fold_in(ctx, k, value)?;
            }
        }

        // Shaving: a value whose indicator product is identically zero is
        // inconsistent, so the variable takes the opposite value.
        for k in 0..self.vars.len() {
            if self.seen[k] || ctx.is_instantiated(self.vars[k]) {
                continue;
            }
            let (zero_off, zero_on) = {
                let mut dd = self.dd.borrow_mut();
                let t0 = dd.apply(self.root, self.id_not_x[k], BinOp::Prod);
                let zero_off = approx_eq(dd.max_value(t0), 0.0);
                let zero_on = if zero_off {
                    false
                } else {
                    let t1 = dd.apply(self.root, self.id_x[k], BinOp::Prod);
                    approx_eq(dd.max_value(t1), 0.0)
                };
                (zero_off, zero_on)
            };
            if zero_off {
                debug!("shave: {} = 0 is inconsistent", self.dd_vars[k]);
                ctx.instantiate_to(self.vars[k], true)?;
            } else if zero_on {
                debug!("shave: {} = 1 is inconsistent", self.dd_vars[k]);
                ctx.instantiate_to(self.vars[k], false)?;
            }
        }

        // Reclaim the shaving temporaries.
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
    use crate::aadd::Aadd;
    use crate::add::Add;
    use crate::order::VarOrder;
    use crate::solver::Model;

    /// Post `x_1 + ... + x_n >= threshold` over fresh host variables.
    fn post_threshold<D: DecisionDiagram + 'static>(
        model: &mut Model,
        dd: Rc<RefCell<D>>,
        n: u32,
        threshold: f64,
    ) -> (usize, Vec<BoolVar>) {
        let (root, dd_vars) = {
            let mut store = dd.borrow_mut();
            let mut f = store.get_constant_node(0.0);
            let mut dd_vars = Vec::new();
            for i in 1..=n {
                let v = VarId::new(i);
                let x = store.get_var_node(v, 0.0, 1.0);
                f = store.apply(f, x, BinOp::Sum);
                dd_vars.push(v);
            }
            let t = store.get_constant_node(threshold);
            (store.apply(f, t, BinOp::GreaterEq), dd_vars)
        };
        let vars: Vec<BoolVar> = (0..n).map(|_| model.new_bool_var()).collect();
        let prop = DdPropagator::new(dd, root, vars.clone(), dd_vars);
        let id = model.post(Box::new(prop));
        (id, vars)
    }

    #[test]
    fn test_shaving_forces_remaining_variables() {
        let mut model = Model::new();
        let dd = Rc::new(RefCell::new(Aadd::new(VarOrder::numbered(3))));
        // x1 + x2 + x3 >= 3: everything must be 1.
        let (_, vars) = post_threshold(&mut model, dd, 3, 3.0);
        model.propagate().unwrap();
        for &v in &vars {
            assert!(model.value(v));
        }
    }

    #[test]
    fn test_acknowledge_then_fail() {
        let mut model = Model::new();
        let dd = Rc::new(RefCell::new(Aadd::new(VarOrder::numbered(2))));
        // x1 + x2 >= 1.
        let (_, vars) = post_threshold(&mut model, dd, 2, 1.0);
        model.propagate().unwrap();

        model.new_world();
        model.instantiate(vars[0], false).unwrap();
        model.propagate().unwrap();
        // x2 was shaved to 1.
        assert!(model.value(vars[1]));

        model.backtrack();
        assert!(!model.is_instantiated(vars[0]));
        assert!(!model.is_instantiated(vars[1]));

        model.new_world();
        model.instantiate(vars[0], false).unwrap();
        model.instantiate(vars[1], false).unwrap();
        assert_eq!(model.propagate(), Err(Contradiction));
    }

    #[test]
    fn test_backtrack_restores_root_and_seen() {
        let mut model = Model::new();
        let store = Rc::new(RefCell::new(Add::new(VarOrder::numbered(3))));
        let (id, vars) = post_threshold(&mut model, Rc::clone(&store), 3, 2.0);
        model.propagate().unwrap();

        let (root0, seen0) = {
            let p = model
                .propagator(id)
                .as_any()
                .downcast_ref::<DdPropagator<Add>>()
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
            .downcast_ref::<DdPropagator<Add>>()
            .unwrap();
        assert_eq!(p.root(), root0);
        assert_eq!(p.seen(), &seen0[..]);
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let mut model = Model::new();
        let dd = Rc::new(RefCell::new(Aadd::new(VarOrder::numbered(4))));
        let (id, vars) = post_threshold(&mut model, Rc::clone(&dd), 4, 2.0);
        model.propagate().unwrap();

        model.new_world();
        model.instantiate(vars[1], true).unwrap();
        model.propagate().unwrap();

        let root_after = {
            model
                .propagator(id)
                .as_any()
                .downcast_ref::<DdPropagator<Aadd>>()
                .unwrap()
                .root()
        };
        let domains: Vec<_> = vars
            .iter()
            .map(|&v| (model.is_instantiated(v), model.is_instantiated(v) && model.value(v)))
            .collect();

        model.propagate().unwrap();
        let p = model
            .propagator(id)
            .as_any()
            .downcast_ref::<DdPropagator<Aadd>>()
            .unwrap();
        assert_eq!(p.root(), root_after);
        let domains2: Vec<_> = vars
            .iter()
            .map(|&v| (model.is_instantiated(v), model.is_instantiated(v) && model.value(v)))
            .collect();
        assert_eq!(domains, domains2);
    }

    #[test]
    fn test_entailment_states() {
        let mut model = Model::new();
        let dd = Rc::new(RefCell::new(Aadd::new(VarOrder::numbered(2))));

        // x1 + x2 >= 0 is a tautology: entailed from the start.
        let (taut, _) = post_threshold(&mut model, Rc::clone(&dd), 2, 0.0);
        let p = model
            .propagator(taut)
            .as_any()
            .downcast_ref::<DdPropagator<Aadd>>()
            .unwrap();
        assert_eq!(p.is_entailed(), Entailment::True);

        // x1 + x2 >= 3 over two variables is identically false: the first
        // propagation call must fail.
        let mut infeasible = Model::new();
        let dd2 = Rc::new(RefCell::new(Aadd::new(VarOrder::numbered(2))));
        let (id, _) = post_threshold(&mut infeasible, dd2, 2, 3.0);
        let p = infeasible
            .propagator(id)
            .as_any()
            .downcast_ref::<DdPropagator<Aadd>>()
            .unwrap();
        assert_eq!(p.is_entailed(), Entailment::False);
        assert_eq!(infeasible.propagate(), Err(Contradiction));
    }
}

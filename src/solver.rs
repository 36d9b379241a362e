//! The minimal host the propagators run inside.
//!
//! The engine proper never owns a search; it expects a host offering Boolean
//! variables, a trail with world checkpoints, and a propagation fixpoint
//! loop. [`Model`] is that host, kept deliberately small: domains are 2-bit
//! masks, the trail stores plain data records (domain undo entries and
//! propagator [`Restorer`]s, never closures), and worlds delimit trail segments
//! that [`Model::backtrack`] replays in reverse.

use log::debug;
use thiserror::Error;

use crate::types::NodeId;

/// The propagation failure signal.
///
/// Raised when a constraint is violated or a domain would become empty;
/// caught by the search to initiate backtracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("contradiction during propagation")]
pub struct Contradiction;

/// A host Boolean search variable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct BoolVar(usize);

impl BoolVar {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Entailment status of a posted constraint against the current domains.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Entailment {
    /// Every remaining assignment satisfies the constraint.
    True,
    /// No remaining assignment satisfies the constraint.
    False,
    Undefined,
}

/// A restorer record scheduled on the trail by a propagator.
///
/// The trail never stores closures; it replays these records through
/// [`Propagator::restore`] on backtrack.
#[derive(Debug, Copy, Clone)]
pub enum Restorer {
    /// Reset the propagator's root to `root` (unregistering the current one).
    RestoreRoot { root: NodeId },
    /// Clear the propagator's `seen` flag for local variable `k`.
    ClearSeen { k: usize },
}

/// A constraint propagator participating in the host's fixpoint loop.
pub trait Propagator {
    /// Enforce the constraint against the current domains.
    fn propagate(&mut self, ctx: &mut PropagationContext<'_>) -> Result<(), Contradiction>;

    /// Entailment from the propagator's own state.
    fn is_entailed(&self) -> Entailment;

    /// Replay one restorer record popped from the trail.
    fn restore(&mut self, restorer: Restorer);

    /// Downcasting hook for hosts that inspect a posted propagator.
    fn as_any(&self) -> &dyn std::any::Any;
}

const BOTH: u8 = 0b11;

enum TrailEntry {
    Domain { var: BoolVar, mask: u8 },
    Propagator { prop: usize, restorer: Restorer },
}

struct SearchState {
    domains: Vec<u8>,
    trail: Vec<TrailEntry>,
    world_marks: Vec<usize>,
    changed: bool,
}

impl SearchState {
    fn world_index(&self) -> usize {
        self.world_marks.len() + 1
    }

    fn mask_of(&self, value: bool) -> u8 {
        if value {
            0b10
        } else {
            0b01
        }
    }

    fn is_instantiated(&self, var: BoolVar) -> bool {
        self.domains[var.0] != BOTH
    }

    fn value(&self, var: BoolVar) -> bool {
        match self.domains[var.0] {
            0b01 => false,
            0b10 => true,
            mask => panic!("Variable {:?} is not instantiated (mask {:#b})", var, mask),
        }
    }

    fn trail_domain(&mut self, var: BoolVar) {
        if self.world_index() > 1 {
            self.trail.push(TrailEntry::Domain {
                var,
                mask: self.domains[var.0],
            });
        }
    }

    fn instantiate_to(&mut self, var: BoolVar, value: bool) -> Result<(), Contradiction> {
        let target = self.mask_of(value);
        let current = self.domains[var.0];
        if current == target {
            return Ok(());
        }
        if current & target == 0 {
            return Err(Contradiction);
        }
        self.trail_domain(var);
        self.domains[var.0] = target;
        self.changed = true;
        Ok(())
    }

    fn remove_value(&mut self, var: BoolVar, value: bool) -> Result<(), Contradiction> {
        let removed = self.mask_of(value);
        let current = self.domains[var.0];
        if current & removed == 0 {
            return Ok(());
        }
        if current == removed {
            return Err(Contradiction);
        }
        self.trail_domain(var);
        self.domains[var.0] = current & !removed;
        self.changed = true;
        Ok(())
    }
}

/// The view of the host a propagator gets during one `propagate` call.
pub struct PropagationContext<'a> {
    state: &'a mut SearchState,
    prop: usize,
}

impl PropagationContext<'_> {
    pub fn is_instantiated(&self, var: BoolVar) -> bool {
        self.state.is_instantiated(var)
    }

    /// The value of an instantiated variable.
    ///
    /// # Panics
    ///
    /// Panics if `var` is not instantiated.
    pub fn value(&self, var: BoolVar) -> bool {
        self.state.value(var)
    }

    /// Narrow `var` to `value`, trailing the change (above the root world).
    pub fn instantiate_to(&mut self, var: BoolVar, value: bool) -> Result<(), Contradiction> {
        self.state.instantiate_to(var, value)
    }

    /// Remove `value` from the domain of `var`; removing the last value fails.
    pub fn remove_value(&mut self, var: BoolVar, value: bool) -> Result<(), Contradiction> {
        self.state.remove_value(var, value)
    }

    /// Schedule a restorer record at the current world.
    pub fn save(&mut self, restorer: Restorer) {
        self.state.trail.push(TrailEntry::Propagator {
            prop: self.prop,
            restorer,
        });
    }

    /// 1 at the root; > 1 inside the search.
    pub fn world_index(&self) -> usize {
        self.state.world_index()
    }
}

/// The host model: variables, trail, worlds and registered propagators.
pub struct Model {
    state: SearchState,
    propagators: Vec<Box<dyn Propagator>>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self {
            state: SearchState {
                domains: Vec::new(),
                trail: Vec::new(),
                world_marks: Vec::new(),
                changed: false,
            },
            propagators: Vec::new(),
        }
    }

    /// Create a fresh Boolean variable with domain `{0, 1}`.
    pub fn new_bool_var(&mut self) -> BoolVar {
        self.state.domains.push(BOTH);
        BoolVar(self.state.domains.len() - 1)
    }

    /// Register a propagator; it runs from the next
    /// [`propagate`][Model::propagate] call on.
    pub fn post(&mut self, propagator: Box<dyn Propagator>) -> usize {
        self.propagators.push(propagator);
        self.propagators.len() - 1
    }

    pub fn propagator(&self, id: usize) -> &dyn Propagator {
        self.propagators[id].as_ref()
    }

    pub fn world_index(&self) -> usize {
        self.state.world_index()
    }

    pub fn is_instantiated(&self, var: BoolVar) -> bool {
        self.state.is_instantiated(var)
    }

    pub fn value(&self, var: BoolVar) -> bool {
        self.state.value(var)
    }

    /// Open a new world: subsequent changes are undone by one
    /// [`backtrack`][Model::backtrack].
    pub fn new_world(&mut self) {
        self.state.world_marks.push(self.state.trail.len());
        debug!("new world {}", self.state.world_index());
    }

    /// A search decision: narrow `var` to `value` at the current world.
    pub fn instantiate(&mut self, var: BoolVar, value: bool) -> Result<(), Contradiction> {
        self.state.instantiate_to(var, value)
    }

    /// Undo the innermost world, replaying the trail in reverse.
    pub fn backtrack(&mut self) {
        let mark = self
            .state
            .world_marks
            .pop()
            .expect("backtrack below the root world");
        debug!("backtrack to world {}", self.state.world_index());
        while self.state.trail.len() > mark {
            match self.state.trail.pop().expect("trail shorter than its mark") {
                TrailEntry::Domain { var, mask } => self.state.domains[var.0] = mask,
                TrailEntry::Propagator { prop, restorer } => {
                    self.propagators[prop].restore(restorer);
                }
            }
        }
    }

    /// Run every propagator to fixpoint.
    pub fn propagate(&mut self) -> Result<(), Contradiction> {
        let state = &mut self.state;
        let propagators = &mut self.propagators;
        loop {
            state.changed = false;
            for (i, prop) in propagators.iter_mut().enumerate() {
                let mut ctx = PropagationContext {
                    state: &mut *state,
                    prop: i,
                };
                prop.propagate(&mut ctx)?;
            }
            if !state.changed {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ForceTrue {
        var: BoolVar,
        calls: usize,
    }

    impl Propagator for ForceTrue {
        fn propagate(&mut self, ctx: &mut PropagationContext<'_>) -> Result<(), Contradiction> {
            self.calls += 1;
            ctx.instantiate_to(self.var, true)
        }
        fn is_entailed(&self) -> Entailment {
            Entailment::Undefined
        }
        fn restore(&mut self, _restorer: Restorer) {}
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_domains_and_decisions() {
        let mut model = Model::new();
        let x = model.new_bool_var();
        assert!(!model.is_instantiated(x));

        model.new_world();
        model.instantiate(x, false).unwrap();
        assert!(model.is_instantiated(x));
        assert!(!model.value(x));

        // Conflicting narrowing fails without touching the domain.
        assert_eq!(model.instantiate(x, true), Err(Contradiction));
        assert!(!model.value(x));

        model.backtrack();
        assert!(!model.is_instantiated(x));
    }

    #[test]
    fn test_remove_value() {
        let mut model = Model::new();
        let x = model.new_bool_var();
        model.new_world();

        let mut state_ctx = PropagationContext {
            state: &mut model.state,
            prop: 0,
        };
        state_ctx.remove_value(x, false).unwrap();
        assert!(state_ctx.is_instantiated(x));
        assert!(state_ctx.value(x));
        // Removing the remaining value is a contradiction.
        assert_eq!(state_ctx.remove_value(x, true), Err(Contradiction));
        // Removing an already-absent value is a no-op.
        state_ctx.remove_value(x, false).unwrap();
    }

    #[test]
    fn test_propagation_fixpoint() {
        let mut model = Model::new();
        let x = model.new_bool_var();
        let id = model.post(Box::new(ForceTrue { var: x, calls: 0 }));
        model.propagate().unwrap();
        assert!(model.value(x));

        // The first round narrowed the domain, so a second round confirmed
        // the fixpoint.
        let p = model
            .propagator(id)
            .as_any()
            .downcast_ref::<ForceTrue>()
            .unwrap();
        assert_eq!(p.calls, 2);
    }

    #[test]
    fn test_backtrack_restores_domains() {
        let mut model = Model::new();
        let x = model.new_bool_var();
        let y = model.new_bool_var();

        model.new_world();
        model.instantiate(x, true).unwrap();
        model.new_world();
        model.instantiate(y, false).unwrap();

        model.backtrack();
        assert!(model.is_instantiated(x));
        assert!(!model.is_instantiated(y));
        model.backtrack();
        assert!(!model.is_instantiated(x));
    }

    #[test]
    #[should_panic(expected = "backtrack below the root world")]
    fn test_backtrack_at_root_panics() {
        let mut model = Model::new();
        model.backtrack();
    }
}

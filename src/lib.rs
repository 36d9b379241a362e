//! # aadd-rs: Algebraic Decision Diagrams with a propagation engine
//!
//! **`aadd-rs`** is a manager-centric library for working with **Algebraic
//! Decision Diagrams (ADDs)** and their affine extension (**AADDs**), plus a
//! constraint propagator that runs a 0/1 diagram inside a backtracking
//! search. It is designed for pseudo-Boolean constraint reasoning, bounded
//! approximation, and decision-diagram experimentation.
//!
//! ## What is an ADD?
//!
//! An Algebraic Decision Diagram represents a function from Boolean variables
//! to the reals as a directed acyclic graph. For a fixed variable ordering the
//! reduced form is **canonical**: every function has exactly one
//! representation, so equality of node identifiers decides equality of
//! functions. The affine variant (AADD) additionally factors an affine pair
//! `(c, b)` out of every edge, so functions that differ only by scale and
//! offset share the same nodes.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: All operations go through the
//!   [`Add`][crate::add::Add] or [`Aadd`][crate::aadd::Aadd] manager. This
//!   ensures structural sharing (hash consing) and maintains the canonical
//!   form invariant.
//! - **Generic `apply`**: One binary combinator covers arithmetic
//!   (`+ - * /`, min, max) and comparisons (which produce 0/1 indicator
//!   diagrams).
//! - **Bounded-error pruning**: Sub-diagrams collapse to terminals under a
//!   configurable error budget, yielding strict lower bounds, upper bounds,
//!   or minimal-deviation approximations.
//! - **Explicit root anchoring**: There is no tracing collector; callers
//!   anchor the roots they keep (`add_special_node`) and `flush_caches`
//!   reclaims everything else.
//! - **Trail-aware propagation**: [`DdPropagator`][crate::propagator::DdPropagator]
//!   and [`AddPropagator`][crate::support::AddPropagator] fold search
//!   decisions into the diagram, shave inconsistent values, and restore their
//!   state bitwise on backtracking.
//!
//! ## Basic Usage
//!
//! ```rust
//! use aadd_rs::add::Add;
//! use aadd_rs::op::BinOp;
//! use aadd_rs::order::VarOrder;
//! use aadd_rs::types::VarId;
//!
//! // 1. Initialize the manager with a variable ordering.
//! let mut dd = Add::new(VarOrder::numbered(10));
//!
//! // 2. Build f = x1 + x2 + x3.
//! let mut f = dd.get_constant_node(0.0);
//! for i in 1..=3 {
//!     let x = dd.get_var_node(VarId::new(i), 0.0, 1.0);
//!     f = dd.apply(f, x, BinOp::Sum);
//! }
//!
//! // 3. Threshold it: g = I[f >= 2].
//! let two = dd.get_constant_node(2.0);
//! let g = dd.apply(f, two, BinOp::GreaterEq);
//!
//! // 4. Check properties.
//! assert_eq!(dd.min_value(g), 0.0);
//! assert_eq!(dd.max_value(g), 1.0);
//! assert_eq!(dd.evaluate(g, &[true, true, false, false, false, false, false, false, false, false]), 1.0);
//! ```
//!
//! ## Core Components
//!
//! - **[`add`]** / **[`aadd`]**: The two diagram engines.
//! - **[`dd`]**: The [`DecisionDiagram`][crate::dd::DecisionDiagram] trait the
//!   propagators program against.
//! - **[`propagator`]** / **[`support`]**: The indicator-product and the
//!   support-DFS propagator.
//! - **[`solver`]**: The minimal host (Boolean domains, trail, worlds).
//! - **[`dot`]**: Graphviz export.

pub mod aadd;
pub mod add;
pub mod cache;
pub mod dd;
pub mod dot;
pub mod op;
pub mod order;
pub mod propagator;
pub mod prune;
pub mod solver;
pub mod storage;
pub mod support;
pub mod types;
pub mod utils;

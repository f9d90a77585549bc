#![forbid(unsafe_code)]

//! Reactive variables.
//!
//! - [`VariableGraph`]: an arena of named value cells with dependency edges.
//! - [`Variable`]: a cheap handle to one cell.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//!
//! # Architecture
//!
//! The graph is an `Rc<RefCell<..>>` arena indexed by [`VarId`]. Dependency
//! and dependent relations are index sets, so the back-references need no
//! shared ownership between cells. Subscriber callbacks are always invoked
//! after the arena borrow is released, which lets a callback read or write
//! other variables.
//!
//! # Invariants
//!
//! 1. Relations are mutual: if A depends on B, B lists A as a dependent.
//! 2. Setting a value equal to the current value is a no-op (no
//!    notifications, no dirty marking).
//! 3. Subscribers are notified in registration order, before dependents are
//!    marked dirty.
//! 4. Dirty propagation visits each transitive dependent at most once.
//! 5. The dependency relation is acyclic: an edge that would close a cycle is
//!    rejected.

pub mod graph;
pub mod variable;

pub use graph::{VarId, VariableGraph};
pub use variable::{Subscription, Variable};

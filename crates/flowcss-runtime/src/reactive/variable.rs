#![forbid(unsafe_code)]

//! Handles to single variables and their subscriptions.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use flowcss_core::Value;

use super::graph::{self, GraphInner, VarId, VariableGraph};
use crate::error::Result;

/// A handle to one variable in a [`VariableGraph`].
///
/// Cloning a `Variable` creates a new handle to the **same** cell.
#[derive(Clone)]
pub struct Variable {
    graph: VariableGraph,
    id: VarId,
    name: Rc<str>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("value", &self.get())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.ptr_eq(&other.graph)
    }
}

impl Variable {
    pub(crate) fn new(graph: VariableGraph, id: VarId, name: Rc<str>) -> Self {
        Self { graph, id, name }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> VarId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn graph(&self) -> &VariableGraph {
        &self.graph
    }

    /// Current value, `None` until one is set.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.graph.value_of(self.id)
    }

    /// Store a new value.
    ///
    /// Equal values are ignored and return `Ok(false)`. Otherwise the value is
    /// stored, the dirty flag cleared, every subscriber notified in order, and
    /// then every transitive dependent marked dirty.
    pub fn set(&self, value: impl Into<Value>) -> Result<bool> {
        self.graph.set(self.id, value.into())
    }

    /// Run `compute` and store its result with [`set`](Self::set).
    ///
    /// A failing closure is logged and leaves the value and dirty flag
    /// untouched; the call then returns `Ok(false)`.
    pub fn compute(&self, compute: impl FnOnce() -> Result<Value>) -> Result<bool> {
        match compute() {
            Ok(value) => self.set(value),
            Err(err) => {
                tracing::warn!(
                    message = "variable.compute_failed",
                    variable = %self.name,
                    error = %err
                );
                Ok(false)
            }
        }
    }

    /// Mark this variable and all its transitive dependents dirty. A variable
    /// that is already dirty is left alone. Returns how many variables were
    /// newly marked.
    pub fn mark_dirty(&self) -> usize {
        self.graph.mark_dirty(self.id)
    }

    pub fn mark_clean(&self) {
        self.graph.mark_clean(self.id);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.graph.is_dirty(self.id)
    }

    /// Clock time of the last value change, in milliseconds.
    #[must_use]
    pub fn last_computed_ms(&self) -> Option<f64> {
        self.graph.last_computed_ms(self.id)
    }

    /// Record that this variable reads `other`. Fails with
    /// [`FlowError::Cycle`](crate::FlowError::Cycle) if `other` already
    /// depends on this variable.
    pub fn add_dependency(&self, other: &Variable) -> Result<()> {
        self.graph.add_dependency(self.id, other.id)
    }

    pub fn remove_dependency(&self, other: &Variable) -> bool {
        self.graph.remove_dependency(self.id, other.id)
    }

    /// Names of the variables this one reads.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.graph.dependency_names(self.id)
    }

    /// Names of the variables that read this one.
    #[must_use]
    pub fn dependents(&self) -> Vec<String> {
        self.graph.dependent_names(self.id)
    }

    /// Call `callback` with every new value.
    pub fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Result<Subscription> {
        self.try_subscribe(move |value| {
            callback(value);
            Ok(())
        })
    }

    /// Like [`subscribe`](Self::subscribe) with a fallible callback. Errors
    /// are logged and do not stop the remaining subscribers.
    pub fn try_subscribe(
        &self,
        callback: impl Fn(&Value) -> Result<()> + 'static,
    ) -> Result<Subscription> {
        self.graph.subscribe(self.id, Rc::new(callback))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.graph.subscriber_count(self.id)
    }
}

/// RAII guard for a subscriber callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    graph: Weak<RefCell<GraphInner>>,
    var: VarId,
    key: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("var", &self.var)
            .field("key", &self.key)
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(graph: Weak<RefCell<GraphInner>>, var: VarId, key: u64) -> Self {
        Self { graph, var, key }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(graph::unsubscribe(&self.graph, self.var, self.key));
    }
}

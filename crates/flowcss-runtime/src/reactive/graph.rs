#![forbid(unsafe_code)]

//! Arena-backed variable graph.
//!
//! Every variable lives in a slot of one [`VariableGraph`]. Slots are never
//! removed, so a [`VarId`] stays valid for the life of the graph; disposal
//! empties the relation sets and subscriber lists instead.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use flowcss_core::Value;
use flowcss_core::clock::Clock;

use super::variable::{Subscription, Variable};
use crate::error::{FlowError, Result};

/// Index of a variable inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) type Subscriber = Rc<dyn Fn(&Value) -> Result<()>>;

struct Slot {
    name: Rc<str>,
    value: Option<Value>,
    dirty: bool,
    last_computed_ms: Option<f64>,
    dependencies: BTreeSet<VarId>,
    dependents: BTreeSet<VarId>,
    subscribers: Vec<(u64, Subscriber)>,
}

impl Slot {
    fn new(name: Rc<str>, value: Option<Value>) -> Self {
        Self {
            name,
            value,
            dirty: false,
            last_computed_ms: None,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            subscribers: Vec::new(),
        }
    }
}

pub(crate) struct GraphInner {
    slots: Vec<Slot>,
    names: AHashMap<Rc<str>, VarId>,
    next_subscriber: u64,
    clock: Clock,
    disposed: bool,
}

impl GraphInner {
    fn slot(&self, id: VarId) -> Result<&Slot> {
        self.slots.get(id.index()).ok_or_else(|| unknown(id))
    }

    fn slot_mut(&mut self, id: VarId) -> Result<&mut Slot> {
        self.slots.get_mut(id.index()).ok_or_else(|| unknown(id))
    }

    /// Mark every transitive dependent of `id` dirty. Dependents that are
    /// already dirty stop the walk. Returns the number of newly dirty slots.
    fn mark_dependents_dirty(&mut self, id: VarId) -> usize {
        let mut work: Vec<VarId> = match self.slots.get(id.index()) {
            Some(slot) => slot.dependents.iter().rev().copied().collect(),
            None => return 0,
        };
        let mut marked = 0;
        while let Some(next) = work.pop() {
            let Some(slot) = self.slots.get_mut(next.index()) else {
                continue;
            };
            if slot.dirty {
                continue;
            }
            slot.dirty = true;
            marked += 1;
            work.extend(slot.dependents.iter().rev().copied());
        }
        marked
    }

    /// Whether `to` is reachable from `from` by following dependency edges.
    fn depends_on(&self, from: VarId, to: VarId) -> bool {
        let mut seen = BTreeSet::new();
        let mut work = vec![from];
        while let Some(next) = work.pop() {
            if next == to {
                return true;
            }
            if !seen.insert(next) {
                continue;
            }
            if let Some(slot) = self.slots.get(next.index()) {
                work.extend(slot.dependencies.iter().copied());
            }
        }
        false
    }
}

fn unknown(id: VarId) -> FlowError {
    FlowError::UnknownVariable {
        name: format!("#{}", id.0),
    }
}

/// A set of named reactive variables.
///
/// Cloning a `VariableGraph` creates a new handle to the **same** arena.
#[derive(Clone)]
pub struct VariableGraph {
    inner: Rc<RefCell<GraphInner>>,
}

impl fmt::Debug for VariableGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("VariableGraph")
            .field("variables", &inner.slots.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl Default for VariableGraph {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

impl VariableGraph {
    /// Create an empty graph stamping `last_computed` times from `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphInner {
                slots: Vec::new(),
                names: AHashMap::new(),
                next_subscriber: 0,
                clock,
                disposed: false,
            })),
        }
    }

    /// Get the variable called `name`, creating it without a value if needed.
    pub fn variable(&self, name: &str) -> Result<Variable> {
        self.get_or_create(name, None)
    }

    /// Get the variable called `name`, creating it with `initial` if needed.
    /// An existing variable keeps its current value.
    pub fn variable_with(&self, name: &str, initial: impl Into<Value>) -> Result<Variable> {
        self.get_or_create(name, Some(initial.into()))
    }

    fn get_or_create(&self, name: &str, initial: Option<Value>) -> Result<Variable> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Err(FlowError::Disposed);
        }
        if let Some(&id) = inner.names.get(name) {
            let name = Rc::clone(&inner.slots[id.index()].name);
            return Ok(Variable::new(self.clone(), id, name));
        }
        let id = VarId(inner.slots.len() as u32);
        let name: Rc<str> = Rc::from(name);
        let mut slot = Slot::new(Rc::clone(&name), initial);
        if slot.value.is_some() {
            slot.last_computed_ms = Some(inner.clock.now_ms());
        }
        inner.slots.push(slot);
        inner.names.insert(Rc::clone(&name), id);
        Ok(Variable::new(self.clone(), id, name))
    }

    /// Look up an existing variable.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Variable> {
        let inner = self.inner.borrow();
        let id = *inner.names.get(name)?;
        let name = Rc::clone(&inner.slots[id.index()].name);
        Some(Variable::new(self.clone(), id, name))
    }

    /// Current value of the variable called `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        let id = inner.names.get(name)?;
        inner.slots[id.index()].value.clone()
    }

    /// Whether both handles share one arena.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Variable names in creation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .borrow()
            .slots
            .iter()
            .map(|s| s.name.to_string())
            .collect()
    }

    /// Drop every subscription and relation. Values stay readable; creating
    /// variables, setting values, subscribing, and linking fail with
    /// [`FlowError::Disposed`] from now on. Idempotent.
    pub fn dispose(&self) {
        // Subscribers may hold variables (and so this graph). Drop them after
        // the borrow ends.
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            inner.disposed = true;
            for slot in &mut inner.slots {
                slot.dependencies.clear();
                slot.dependents.clear();
                slot.dirty = false;
                dropped.append(&mut slot.subscribers);
            }
        }
        drop(dropped);
    }

    // -----------------------------------------------------------------------
    // Slot operations, addressed by id
    // -----------------------------------------------------------------------

    pub(crate) fn value_of(&self, id: VarId) -> Option<Value> {
        self.inner.borrow().slot(id).ok()?.value.clone()
    }

    /// Store `value`, notify subscribers, then mark dependents dirty.
    /// Returns `false` when `value` equals the current value.
    pub(crate) fn set(&self, id: VarId, value: Value) -> Result<bool> {
        let (name, subscribers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return Err(FlowError::Disposed);
            }
            if inner.slot(id)?.value.as_ref() == Some(&value) {
                return Ok(false);
            }
            let now = inner.clock.now_ms();
            let slot = inner.slot_mut(id)?;
            slot.value = Some(value.clone());
            slot.last_computed_ms = Some(now);
            slot.dirty = false;
            let subscribers: Vec<Subscriber> =
                slot.subscribers.iter().map(|(_, s)| Rc::clone(s)).collect();
            (Rc::clone(&slot.name), subscribers)
        };

        for subscriber in subscribers {
            if let Err(err) = subscriber(&value) {
                tracing::warn!(
                    message = "variable.subscriber_failed",
                    variable = %name,
                    error = %err
                );
            }
        }

        self.inner.borrow_mut().mark_dependents_dirty(id);
        Ok(true)
    }

    /// Returns the number of variables newly marked dirty, `id` included.
    pub(crate) fn mark_dirty(&self, id: VarId) -> usize {
        let mut inner = self.inner.borrow_mut();
        match inner.slot_mut(id) {
            Ok(slot) if !slot.dirty => slot.dirty = true,
            _ => return 0,
        }
        1 + inner.mark_dependents_dirty(id)
    }

    pub(crate) fn mark_clean(&self, id: VarId) {
        if let Ok(slot) = self.inner.borrow_mut().slot_mut(id) {
            slot.dirty = false;
        }
    }

    pub(crate) fn is_dirty(&self, id: VarId) -> bool {
        self.inner.borrow().slot(id).is_ok_and(|s| s.dirty)
    }

    pub(crate) fn last_computed_ms(&self, id: VarId) -> Option<f64> {
        self.inner.borrow().slot(id).ok()?.last_computed_ms
    }

    /// Record that `dependent` reads `dependency`.
    pub(crate) fn add_dependency(&self, dependent: VarId, dependency: VarId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Err(FlowError::Disposed);
        }
        inner.slot(dependent)?;
        inner.slot(dependency)?;
        if dependent == dependency || inner.depends_on(dependency, dependent) {
            return Err(FlowError::Cycle {
                from: inner.slots[dependent.index()].name.to_string(),
                to: inner.slots[dependency.index()].name.to_string(),
            });
        }
        inner.slots[dependent.index()]
            .dependencies
            .insert(dependency);
        inner.slots[dependency.index()].dependents.insert(dependent);
        Ok(())
    }

    /// Returns whether the edge existed.
    pub(crate) fn remove_dependency(&self, dependent: VarId, dependency: VarId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let removed = inner
            .slot_mut(dependent)
            .is_ok_and(|s| s.dependencies.remove(&dependency));
        if let Ok(slot) = inner.slot_mut(dependency) {
            slot.dependents.remove(&dependent);
        }
        removed
    }

    pub(crate) fn dependency_names(&self, id: VarId) -> Vec<String> {
        self.related_names(id, |s| &s.dependencies)
    }

    pub(crate) fn dependent_names(&self, id: VarId) -> Vec<String> {
        self.related_names(id, |s| &s.dependents)
    }

    fn related_names(&self, id: VarId, pick: impl Fn(&Slot) -> &BTreeSet<VarId>) -> Vec<String> {
        let inner = self.inner.borrow();
        let Ok(slot) = inner.slot(id) else {
            return Vec::new();
        };
        pick(slot)
            .iter()
            .map(|other| inner.slots[other.index()].name.to_string())
            .collect()
    }

    pub(crate) fn subscribe(&self, id: VarId, subscriber: Subscriber) -> Result<Subscription> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Err(FlowError::Disposed);
        }
        let key = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.slot_mut(id)?.subscribers.push((key, subscriber));
        Ok(Subscription::new(Rc::downgrade(&self.inner), id, key))
    }

    pub(crate) fn subscriber_count(&self, id: VarId) -> usize {
        self.inner
            .borrow()
            .slot(id)
            .map_or(0, |s| s.subscribers.len())
    }
}

/// Remove subscriber `key` from `id`. Returns the callback so the caller can
/// drop it outside the borrow.
pub(crate) fn unsubscribe(
    graph: &Weak<RefCell<GraphInner>>,
    id: VarId,
    key: u64,
) -> Option<Subscriber> {
    let inner = graph.upgrade()?;
    let mut inner = inner.try_borrow_mut().ok()?;
    let slot = inner.slot_mut(id).ok()?;
    let pos = slot.subscribers.iter().position(|(k, _)| *k == key)?;
    Some(slot.subscribers.remove(pos).1)
}

#![forbid(unsafe_code)]

//! Boundary to the presentation layer.
//!
//! The engine never formats CSS. [`FlowEngine::style`](crate::FlowEngine::style)
//! hands an element and a [`StyleMap`] to a [`DomBridge`], and the bridge
//! decides how values reach the page: unit inference, batching, and the
//! actual property writes all live on the other side of this trait.
//!
//! A bridge that wants live updates subscribes to the [`Variable`]s found in
//! the map. Writes it buffers are committed when the engine calls
//! [`DomBridge::flush`] at the end of each tick.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use flowcss_core::Value;
use indexmap::IndexMap;

use crate::error::Result;
use crate::reactive::{Subscription, Variable};

/// Opaque identifier of a presentation element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(String);

impl ElementHandle {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ElementHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A style property's value: fixed, or bound to a reactive variable.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    Literal(Value),
    Variable(Variable),
}

impl StyleValue {
    /// The value to write right now. `None` for a variable with no value yet.
    #[must_use]
    pub fn current(&self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Variable(var) => var.get(),
        }
    }
}

impl From<Value> for StyleValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<Variable> for StyleValue {
    fn from(var: Variable) -> Self {
        Self::Variable(var)
    }
}

impl From<&Variable> for StyleValue {
    fn from(var: &Variable) -> Self {
        Self::Variable(var.clone())
    }
}

impl From<f64> for StyleValue {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Number(n))
    }
}

impl From<&str> for StyleValue {
    fn from(text: &str) -> Self {
        Self::Literal(Value::from(text))
    }
}

/// Property name to value, in insertion order.
pub type StyleMap = IndexMap<String, StyleValue>;

/// Presentation-layer collaborator.
pub trait DomBridge {
    /// Bind `styles` to `element`.
    fn apply(&mut self, element: &ElementHandle, styles: &StyleMap) -> Result<()>;

    /// Commit buffered writes. Called once per engine tick.
    fn flush(&mut self) {}
}

/// Bridge that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBridge;

impl DomBridge for NullBridge {
    fn apply(&mut self, _element: &ElementHandle, _styles: &StyleMap) -> Result<()> {
        Ok(())
    }
}

/// One property write observed by a [`RecordingBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct StyleWrite {
    pub element: ElementHandle,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Default)]
struct Recording {
    applied: Vec<(ElementHandle, StyleMap)>,
    pending: Vec<StyleWrite>,
    committed: Vec<StyleWrite>,
    flushes: u64,
    subscriptions: Vec<Subscription>,
}

/// Bridge that records writes instead of touching a page.
///
/// Literal properties are written immediately; variable-bound properties are
/// written with their current value and again on every change. Writes stay
/// pending until [`flush`](DomBridge::flush).
///
/// Cloning creates a new handle to the **same** recording, so a test can keep
/// one handle and give the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingBridge {
    state: Rc<RefCell<Recording>>,
}

impl RecordingBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `apply` call so far.
    #[must_use]
    pub fn applied(&self) -> Vec<(ElementHandle, StyleMap)> {
        self.state.borrow().applied.clone()
    }

    /// Writes committed by past flushes, oldest first.
    #[must_use]
    pub fn committed(&self) -> Vec<StyleWrite> {
        self.state.borrow().committed.clone()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.state.borrow().flushes
    }

    /// Most recently committed value of `property` on `element`.
    #[must_use]
    pub fn latest(&self, element: &str, property: &str) -> Option<Value> {
        self.state
            .borrow()
            .committed
            .iter()
            .rev()
            .find(|w| w.element.as_str() == element && w.property == property)
            .map(|w| w.value.clone())
    }
}

impl DomBridge for RecordingBridge {
    fn apply(&mut self, element: &ElementHandle, styles: &StyleMap) -> Result<()> {
        let mut subscriptions = Vec::new();
        let mut writes = Vec::new();
        for (property, style) in styles {
            if let Some(value) = style.current() {
                writes.push(StyleWrite {
                    element: element.clone(),
                    property: property.clone(),
                    value,
                });
            }
            if let StyleValue::Variable(var) = style {
                let state: Weak<RefCell<Recording>> = Rc::downgrade(&self.state);
                let element = element.clone();
                let property = property.clone();
                subscriptions.push(var.subscribe(move |value| {
                    if let Some(state) = state.upgrade() {
                        state.borrow_mut().pending.push(StyleWrite {
                            element: element.clone(),
                            property: property.clone(),
                            value: value.clone(),
                        });
                    }
                })?);
            }
        }

        let mut state = self.state.borrow_mut();
        state.applied.push((element.clone(), styles.clone()));
        state.pending.extend(writes);
        state.subscriptions.extend(subscriptions);
        Ok(())
    }

    fn flush(&mut self) {
        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.flushes += 1;
    }
}

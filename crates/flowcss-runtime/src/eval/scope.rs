#![forbid(unsafe_code)]

//! Variable storage seen by the evaluator.

use std::collections::HashMap;
use std::hash::BuildHasher;

use flowcss_core::Value;

use crate::error::Result;
use crate::reactive::VariableGraph;

/// Where a running program reads and writes variables.
pub trait Scope {
    /// Current value of `name`, `None` when unbound.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Write from an assignment inside an expression.
    fn assign(&mut self, name: &str, value: Value) -> Result<()>;

    /// Write a finished task's result to its output variable. Defaults to
    /// [`assign`](Self::assign).
    fn publish(&mut self, name: &str, value: Value) -> Result<()> {
        self.assign(name, value)
    }

    /// Write a result whose inputs changed while it was being computed. The
    /// output must stay due for recomputation. Defaults to
    /// [`assign`](Self::assign).
    fn publish_stale(&mut self, name: &str, value: Value) -> Result<()> {
        self.assign(name, value)
    }
}

impl<S: BuildHasher> Scope for HashMap<String, Value, S> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        self.insert(name.to_string(), value);
        Ok(())
    }
}

impl Scope for VariableGraph {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.value(name)
    }

    /// Creates the variable on first write.
    fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        self.variable(name)?.set(value)?;
        Ok(())
    }

    /// Sets the value and clears the dirty flag even when the value did not
    /// change, so the output is not recomputed until an input changes.
    fn publish(&mut self, name: &str, value: Value) -> Result<()> {
        let var = self.variable(name)?;
        var.set(value)?;
        var.mark_clean();
        Ok(())
    }

    /// Sets the value and leaves the variable dirty.
    fn publish_stale(&mut self, name: &str, value: Value) -> Result<()> {
        let var = self.variable(name)?;
        var.set(value)?;
        var.mark_dirty();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_scope_round_trips() {
        let mut scope: HashMap<String, Value> = HashMap::new();
        assert_eq!(scope.lookup("x"), None);
        scope.assign("x", Value::from(2)).unwrap();
        assert_eq!(scope.lookup("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn graph_assign_creates_and_notifies() {
        let mut graph = VariableGraph::default();
        graph.assign("x", Value::from(1)).unwrap();
        assert_eq!(graph.lookup("x"), Some(Value::Number(1.0)));
        assert!(graph.find("x").is_some());
    }

    #[test]
    fn graph_publish_clears_dirty_for_unchanged_value() {
        let mut graph = VariableGraph::default();
        let out = graph.variable_with("out", 3.0).unwrap();
        out.mark_dirty();
        graph.publish("out", Value::Number(3.0)).unwrap();
        assert!(!out.is_dirty());
    }

    #[test]
    fn graph_stale_publish_keeps_dirty() {
        let mut graph = VariableGraph::default();
        let out = graph.variable("out").unwrap();
        graph.publish_stale("out", Value::Number(1.0)).unwrap();
        assert_eq!(out.get(), Some(Value::Number(1.0)));
        assert!(out.is_dirty());
    }
}

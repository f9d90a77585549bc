#![forbid(unsafe_code)]

//! Expression evaluation.
//!
//! A parsed tree is compiled once into a flat [`Program`] and executed by a
//! [`Machine`]. The machine keeps its whole state (program counter, value
//! stack, loop frames) between calls, so the scheduler can run a program a
//! bounded number of steps at a time and resume it on a later frame.
//!
//! Variables are read from and written to a [`Scope`]. The variable graph is
//! the production scope; a plain `HashMap` works for tests and one-off
//! evaluation.
//!
//! ```
//! use std::collections::HashMap;
//! use flowcss_core::{Value, expr::parse};
//! use flowcss_runtime::eval::evaluate;
//!
//! let mut scope: HashMap<String, Value> = HashMap::new();
//! scope.insert("a".into(), Value::Number(5.0));
//! let value = evaluate(&parse("clamp(a * 2, 0, 8)"), &mut scope).unwrap();
//! assert_eq!(value, Value::Number(8.0));
//! ```

pub mod machine;
pub mod ops;
pub mod program;
pub mod scope;

pub use machine::{MAX_LOOP_ITERATIONS, Machine, Step};
pub use program::{Instr, Program};
pub use scope::Scope;

use flowcss_core::Value;
use flowcss_core::expr::{Expression, Node};

use crate::error::Result;

/// Compile and run `expr` to completion.
pub fn evaluate(expr: &Expression, scope: &mut dyn Scope) -> Result<Value> {
    evaluate_node(&expr.root, scope)
}

/// Compile and run a bare tree to completion.
pub fn evaluate_node(node: &Node, scope: &mut dyn Scope) -> Result<Value> {
    let program = Program::compile(node)?;
    Machine::new().run_to_end(&program, scope)
}

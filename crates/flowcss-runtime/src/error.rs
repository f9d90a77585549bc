#![forbid(unsafe_code)]

//! Error types for the runtime.
//!
//! Parsing never fails, so every error here comes from evaluation or from
//! structural misuse of the variable graph and engine. Evaluation errors are
//! caught per task and logged by the scheduler; structural errors are returned
//! to the caller.

use flowcss_core::expr::Arity;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("dependency cycle: {from} -> {to}")]
    Cycle { from: String, to: String },

    #[error("engine has been disposed")]
    Disposed,

    #[error("subscriber failed: {message}")]
    Subscriber { message: String },

    #[error("compute failed: {message}")]
    Compute { message: String },

    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },
}

impl FlowError {
    #[must_use]
    pub fn subscriber(message: impl Into<String>) -> Self {
        Self::Subscriber {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn compute(message: impl Into<String>) -> Self {
        Self::Compute {
            message: message.into(),
        }
    }
}

/// Failure while running a compiled expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unbound variable: {name}")]
    UnboundVariable { name: String },

    #[error("`{op}` cannot take a {found} operand")]
    TypeMismatch { op: &'static str, found: &'static str },

    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: Arity,
        found: usize,
    },

    #[error("`{op}` is missing its right operand")]
    MissingOperand { op: &'static str },

    #[error("loop exceeds {limit} iterations")]
    LoopLimit { limit: u32 },

    #[error("evaluation stack underflow")]
    StackUnderflow,
}

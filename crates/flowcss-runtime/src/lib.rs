#![forbid(unsafe_code)]

//! Runtime: reactive variables, expression evaluation, and the
//! frame-budgeted scheduler.
//!
//! # Role in flowcss
//! `flowcss-runtime` turns parsed expressions (from `flowcss-core`) into live
//! values. It owns the variable graph, compiles and runs expressions, caches
//! pure results, and spreads expensive work over animation frames.
//!
//! # Primary responsibilities
//! - **VariableGraph**: named reactive cells with dirty propagation.
//! - **Machine/Program**: resumable evaluation of every expression form.
//! - **ExecutionEngine**: priority queue run against a per-frame budget.
//! - **ResultCache**: bounded memo cache with optional expiry.
//! - **FlowEngine**: the per-frame tick tying all of the above to a
//!   [`DomBridge`].
//!
//! # How it fits in the system
//! The host owns a [`FlowEngine`], feeds it pointer and viewport changes, and
//! calls [`FlowEngine::tick`] once per animation frame. Everything runs on
//! the caller's thread; nothing blocks.

pub mod cache;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod eval;
pub mod reactive;
pub mod scheduler;

pub use cache::{CacheStats, ResultCache, generate_key};
pub use config::EngineConfig;
pub use dom::{
    DomBridge, ElementHandle, NullBridge, RecordingBridge, StyleMap, StyleValue, StyleWrite,
};
pub use engine::{BUILTINS, FLOW_PREFIX, FlowEngine, GOLDEN_RATIO};
pub use error::{EvalError, FlowError, Result};
pub use eval::{Machine, Program, Scope, Step, evaluate};
pub use reactive::{Subscription, VarId, Variable, VariableGraph};
pub use scheduler::{
    Chunk, ComputationTask, ExecutionEngine, FrameReport, TaskCompletion, TaskFailure, TaskId,
};

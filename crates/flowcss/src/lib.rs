#![forbid(unsafe_code)]

//! flowcss public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.
//!
//! ```
//! use flowcss::prelude::*;
//!
//! let mut engine = flowcss::scoped_engine(EngineConfig::default()).unwrap();
//! engine.variable("size", Some(Value::Number(4.0))).unwrap();
//! let area = engine.flow("size * size").unwrap();
//! engine.start().unwrap();
//! engine.tick().unwrap();
//! assert_eq!(area.get(), Some(Value::Number(16.0)));
//! ```

pub use flowcss_core as core;
pub use flowcss_runtime as runtime;

pub mod prelude {
    pub use flowcss_core::Value;
    pub use flowcss_core::clock::{Clock, LabClock};
    pub use flowcss_core::expr::{Expression, parse};
    pub use flowcss_runtime::{
        DomBridge, ElementHandle, EngineConfig, FlowEngine, FlowError, FrameReport, NullBridge,
        RecordingBridge, StyleMap, StyleValue, Subscription, Variable,
    };
}

/// A new, independent engine on the real clock.
///
/// Identical to [`FlowEngine::new`](flowcss_runtime::FlowEngine::new); there
/// is no process-wide instance.
pub fn scoped_engine(
    config: flowcss_runtime::EngineConfig,
) -> flowcss_runtime::Result<flowcss_runtime::FlowEngine> {
    flowcss_runtime::FlowEngine::new(config)
}

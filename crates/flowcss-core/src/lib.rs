#![forbid(unsafe_code)]

//! Core: value domain, frame clock, and the expression parser.

pub mod clock;
pub mod expr;
pub mod value;

pub use value::Value;

#![forbid(unsafe_code)]

//! Expression language: tokenizer, syntax tree, and parser.
//!
//! ```
//! use flowcss_core::expr::{Node, parse};
//!
//! let expr = parse("sin(time) * 20 + offset");
//! assert_eq!(expr.dependencies, vec!["time", "offset"]);
//! assert!(matches!(expr.root, Node::Operation { .. }));
//! ```

pub mod ast;
pub mod parser;
pub mod token;

pub use ast::{Arity, Expression, Function, Node, Operator, is_function_name};
pub use parser::{MAX_NESTING, extract_dependencies, parse, parse_math};
pub use token::tokenize;

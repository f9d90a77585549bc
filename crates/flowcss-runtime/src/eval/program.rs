#![forbid(unsafe_code)]

//! Tree-to-instruction compiler.
//!
//! Programs are straight-line stack code with forward and backward jumps.
//! Every expression leaves exactly one value on the stack.
//!
//! ```text
//! a > b ? 1 : 0          for i in 0..n { i }
//!
//! 0  load a              0  push 0
//! 1  load b              1  load n
//! 2  op >                2  loop_enter i, exit=5
//! 3  jump_if_false 6     3  load i
//! 4  push 1              4  loop_next body=3
//! 5  jump 7              5  loop_exit
//! 6  push 0
//! ```

use std::fmt;

use flowcss_core::Value;
use flowcss_core::expr::{Function, Node, Operator};

use crate::error::EvalError;

/// One machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Push(Value),
    /// Read a loop binding or scope variable.
    Load(String),
    /// Pop one operand, push the result.
    Unary(Operator),
    /// Pop right then left, push the result.
    Binary(Operator),
    /// Pop `argc` arguments, push the result.
    Call { function: Function, argc: usize },
    /// Pop the test; jump when it is falsy.
    JumpIfFalse(usize),
    Jump(usize),
    /// Assign the top of the stack to a variable, leaving it in place.
    Store(String),
    /// Pop end then start and open a loop frame. An empty range jumps
    /// straight to `exit`.
    LoopEnter { binding: String, exit: usize },
    /// Pop the body value into the frame's sum and advance. Jumps back to
    /// `body` while the range has values left.
    LoopNext { body: usize },
    /// Close the innermost frame and push its sum.
    LoopExit,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(v) => write!(f, "push {v}"),
            Self::Load(name) => write!(f, "load {name}"),
            Self::Unary(op) | Self::Binary(op) => write!(f, "op {op}"),
            Self::Call { function, argc } => write!(f, "call {function}/{argc}"),
            Self::JumpIfFalse(to) => write!(f, "jump_if_false {to}"),
            Self::Jump(to) => write!(f, "jump {to}"),
            Self::Store(name) => write!(f, "store {name}"),
            Self::LoopEnter { binding, exit } => write!(f, "loop_enter {binding}, exit={exit}"),
            Self::LoopNext { body } => write!(f, "loop_next body={body}"),
            Self::LoopExit => f.write_str("loop_exit"),
        }
    }
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    code: Vec<Instr>,
}

impl Program {
    /// Compile `node`.
    ///
    /// Fails only for binary operations built without a right operand, which
    /// the parser never produces.
    pub fn compile(node: &Node) -> Result<Self, EvalError> {
        let mut program = Self::default();
        program.emit_node(node)?;
        Ok(program)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, pc: usize) -> Option<&Instr> {
        self.code.get(pc)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instr] {
        &self.code
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Instr::JumpIfFalse(to) | Instr::Jump(to) => *to = target,
            Instr::LoopEnter { exit, .. } => *exit = target,
            _ => {}
        }
    }

    fn emit_node(&mut self, node: &Node) -> Result<(), EvalError> {
        match node {
            Node::Literal(value) => {
                self.emit(Instr::Push(value.clone()));
            }
            Node::Variable(name) => {
                self.emit(Instr::Load(name.clone()));
            }
            Node::Operation { op, left, right } => {
                self.emit_node(left)?;
                if op.is_unary() {
                    self.emit(Instr::Unary(*op));
                } else {
                    let right = right
                        .as_ref()
                        .ok_or(EvalError::MissingOperand { op: op.symbol() })?;
                    self.emit_node(right)?;
                    self.emit(Instr::Binary(*op));
                }
            }
            Node::Call { function, args } => {
                for arg in args {
                    self.emit_node(arg)?;
                }
                self.emit(Instr::Call {
                    function: *function,
                    argc: args.len(),
                });
            }
            Node::Condition {
                test,
                then,
                otherwise,
            } => {
                self.emit_node(test)?;
                let branch = self.emit(Instr::JumpIfFalse(0));
                self.emit_node(then)?;
                let skip = self.emit(Instr::Jump(0));
                self.patch(branch, self.len());
                match otherwise {
                    Some(otherwise) => self.emit_node(otherwise)?,
                    None => {
                        self.emit(Instr::Push(Value::Bool(false)));
                    }
                }
                self.patch(skip, self.len());
            }
            Node::Loop {
                binding,
                start,
                end,
                body,
            } => {
                self.emit_node(start)?;
                self.emit_node(end)?;
                let enter = self.emit(Instr::LoopEnter {
                    binding: binding.clone(),
                    exit: 0,
                });
                let body_start = self.len();
                self.emit_node(body)?;
                self.emit(Instr::LoopNext { body: body_start });
                self.patch(enter, self.len());
                self.emit(Instr::LoopExit);
            }
            Node::Assignment { target, value } => {
                self.emit_node(value)?;
                self.emit(Instr::Store(target.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, instr) in self.code.iter().enumerate() {
            writeln!(f, "{pc:>3}  {instr}")?;
        }
        Ok(())
    }
}

#![forbid(unsafe_code)]

//! Resumable stack machine.
//!
//! [`Machine::run`] executes at most `max_steps` instructions and then
//! returns [`Step::Suspended`], keeping its program counter, stack, and loop
//! frames. The next call continues exactly where the last one stopped, so a
//! program split across frames performs every side effect once.
//!
//! A machine that returned an error is left mid-program and must not be run
//! again.

use flowcss_core::Value;

use super::ops;
use super::program::{Instr, Program};
use super::scope::Scope;
use crate::error::{EvalError, Result};

/// Upper bound on the iterations of a single loop.
pub const MAX_LOOP_ITERATIONS: u32 = 10_000;

/// Outcome of one [`Machine::run`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(Value),
    /// The step quota ran out first.
    Suspended,
}

#[derive(Debug, Clone)]
struct LoopFrame {
    binding: String,
    current: f64,
    end: f64,
    sum: f64,
}

/// Execution state for one run of a [`Program`].
#[derive(Debug, Clone, Default)]
pub struct Machine {
    pc: usize,
    stack: Vec<Value>,
    loops: Vec<LoopFrame>,
    steps: u64,
}

impl Machine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next instruction.
    #[inline]
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Instructions executed so far.
    #[inline]
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Whether any instruction has run yet.
    #[inline]
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.steps == 0
    }

    /// Rewind to the start of a program.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Run `program` until it finishes or `max_steps` instructions have
    /// executed. `None` runs to completion.
    pub fn run(
        &mut self,
        program: &Program,
        scope: &mut dyn Scope,
        max_steps: Option<usize>,
    ) -> Result<Step> {
        let mut budget = max_steps;
        while let Some(instr) = program.get(self.pc) {
            match budget.as_mut() {
                Some(0) => return Ok(Step::Suspended),
                Some(left) => *left -= 1,
                None => {}
            }
            self.pc += 1;
            self.steps += 1;
            self.execute(instr, scope)?;
        }
        let value = self.pop()?;
        self.stack.clear();
        Ok(Step::Done(value))
    }

    /// Run `program` to completion.
    pub fn run_to_end(&mut self, program: &Program, scope: &mut dyn Scope) -> Result<Value> {
        match self.run(program, scope, None)? {
            Step::Done(value) => Ok(value),
            Step::Suspended => Err(EvalError::StackUnderflow.into()),
        }
    }

    fn execute(&mut self, instr: &Instr, scope: &mut dyn Scope) -> Result<()> {
        match instr {
            Instr::Push(value) => self.stack.push(value.clone()),
            Instr::Load(name) => {
                let value = self
                    .binding(name)
                    .or_else(|| scope.lookup(name))
                    .ok_or_else(|| EvalError::UnboundVariable { name: name.clone() })?;
                self.stack.push(value);
            }
            Instr::Unary(op) => {
                let operand = self.pop()?;
                self.stack.push(ops::unary(*op, &operand)?);
            }
            Instr::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(ops::binary(*op, &left, &right)?);
            }
            Instr::Call { function, argc } => {
                let base = self
                    .stack
                    .len()
                    .checked_sub(*argc)
                    .ok_or(EvalError::StackUnderflow)?;
                let args = self.stack.split_off(base);
                self.stack.push(ops::call(*function, &args)?);
            }
            Instr::JumpIfFalse(target) => {
                if !self.pop()?.is_truthy() {
                    self.pc = *target;
                }
            }
            Instr::Jump(target) => self.pc = *target,
            Instr::Store(name) => {
                let value = self.stack.last().cloned().ok_or(EvalError::StackUnderflow)?;
                scope.assign(name, value)?;
            }
            Instr::LoopEnter { binding, exit } => {
                let end = ops::number("for", &self.pop()?)?.floor();
                let start = ops::number("for", &self.pop()?)?.floor();
                if end - start > f64::from(MAX_LOOP_ITERATIONS) {
                    return Err(EvalError::LoopLimit {
                        limit: MAX_LOOP_ITERATIONS,
                    }
                    .into());
                }
                self.loops.push(LoopFrame {
                    binding: binding.clone(),
                    current: start,
                    end,
                    sum: 0.0,
                });
                if start.is_nan() || end.is_nan() || start >= end {
                    self.pc = *exit;
                }
            }
            Instr::LoopNext { body } => {
                let value = self.pop()?;
                let frame = self.loops.last_mut().ok_or(EvalError::StackUnderflow)?;
                frame.sum += ops::number("for", &value)?;
                frame.current += 1.0;
                if frame.current < frame.end {
                    self.pc = *body;
                }
            }
            Instr::LoopExit => {
                let frame = self.loops.pop().ok_or(EvalError::StackUnderflow)?;
                self.stack.push(Value::Number(frame.sum));
            }
        }
        Ok(())
    }

    fn binding(&self, name: &str) -> Option<Value> {
        self.loops
            .iter()
            .rev()
            .find(|frame| frame.binding == name)
            .map(|frame| Value::Number(frame.current))
    }

    fn pop(&mut self) -> Result<Value> {
        Ok(self.stack.pop().ok_or(EvalError::StackUnderflow)?)
    }
}

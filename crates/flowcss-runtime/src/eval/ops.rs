#![forbid(unsafe_code)]

//! Operator and built-in function semantics.
//!
//! Arithmetic works on numbers, with booleans counting as 0 and 1. Text only
//! takes part in `+` (concatenation) and in comparisons with other text.
//! Division by exactly zero yields 0.

use std::cmp::Ordering;

use flowcss_core::Value;
use flowcss_core::expr::{Function, Operator};

use crate::error::EvalError;

pub(crate) fn number(op: &'static str, value: &Value) -> Result<f64, EvalError> {
    value.as_number().ok_or(EvalError::TypeMismatch {
        op,
        found: value.kind(),
    })
}

/// Apply a unary operator.
pub fn unary(op: Operator, operand: &Value) -> Result<Value, EvalError> {
    let symbol = op.symbol();
    Ok(match op {
        Operator::Not => Value::Bool(!operand.is_truthy()),
        Operator::Neg => Value::Number(-number(symbol, operand)?),
        Operator::Sin => Value::Number(number(symbol, operand)?.sin()),
        Operator::Cos => Value::Number(number(symbol, operand)?.cos()),
        Operator::Tan => Value::Number(number(symbol, operand)?.tan()),
        Operator::Sqrt => Value::Number(number(symbol, operand)?.sqrt()),
        _ => return Err(EvalError::MissingOperand { op: symbol }),
    })
}

/// Apply a binary operator.
pub fn binary(op: Operator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let symbol = op.symbol();
    match op {
        Operator::Add if matches!(left, Value::Text(_)) || matches!(right, Value::Text(_)) => {
            Ok(Value::Text(format!("{left}{right}")))
        }
        Operator::Add => Ok(Value::Number(number(symbol, left)? + number(symbol, right)?)),
        Operator::Sub => Ok(Value::Number(number(symbol, left)? - number(symbol, right)?)),
        Operator::Mul => Ok(Value::Number(number(symbol, left)? * number(symbol, right)?)),
        Operator::Div => {
            let divisor = number(symbol, right)?;
            let dividend = number(symbol, left)?;
            Ok(Value::Number(if divisor == 0.0 {
                0.0
            } else {
                dividend / divisor
            }))
        }
        Operator::Pow => Ok(Value::Number(
            number(symbol, left)?.powf(number(symbol, right)?),
        )),
        Operator::Eq => Ok(Value::Bool(loosely_equal(left, right))),
        Operator::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
        Operator::Lt => compare(symbol, left, right, Ordering::is_lt),
        Operator::Le => compare(symbol, left, right, Ordering::is_le),
        Operator::Gt => compare(symbol, left, right, Ordering::is_gt),
        Operator::Ge => compare(symbol, left, right, Ordering::is_ge),
        Operator::Neg | Operator::Not | Operator::Sin | Operator::Cos | Operator::Tan
        | Operator::Sqrt => unary(op, left),
    }
}

/// Numbers and booleans compare numerically; text compares with text.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(
    op: &'static str,
    left: &Value,
    right: &Value,
    accept: fn(Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Text(l), Value::Text(r)) => Some(l.cmp(r)),
        _ => number(op, left)?.partial_cmp(&number(op, right)?),
    };
    // NaN compares false with everything.
    Ok(Value::Bool(ordering.is_some_and(accept)))
}

/// Call a built-in function.
pub fn call(function: Function, args: &[Value]) -> Result<Value, EvalError> {
    let arity = function.arity();
    if !arity.accepts(args.len()) {
        return Err(EvalError::Arity {
            function: function.name(),
            expected: arity,
            found: args.len(),
        });
    }
    let name = function.name();
    let nums = args
        .iter()
        .map(|arg| number(name, arg))
        .collect::<Result<Vec<f64>, _>>()?;

    let result = match function {
        Function::Sin => nums[0].sin(),
        Function::Cos => nums[0].cos(),
        Function::Tan => nums[0].tan(),
        Function::Sqrt => nums[0].sqrt(),
        Function::Abs => nums[0].abs(),
        Function::Floor => nums[0].floor(),
        Function::Ceil => nums[0].ceil(),
        Function::Round => (nums[0] + 0.5).floor(),
        Function::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Clamp => nums[0].max(nums[1]).min(nums[2]),
        Function::Lerp => nums[0] + (nums[1] - nums[0]) * nums[2],
        Function::Atan2 => nums[0].atan2(nums[1]),
        Function::Pow => nums[0].powf(nums[1]),
        Function::Exp => nums[0].exp(),
        Function::Log => nums[0].ln(),
    };
    Ok(Value::Number(result))
}

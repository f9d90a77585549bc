#![forbid(unsafe_code)]

//! Expression syntax tree.
//!
//! A parsed [`Expression`] owns its root [`Node`] together with the free
//! variables it reads and a complexity score. The tree is immutable once
//! built.
//!
//! # Complexity
//!
//! The score is a scheduling heuristic only:
//!
//! | Node | Cost |
//! |------|------|
//! | literal, variable | 1 |
//! | operation | 1 + 2 + operands |
//! | function call | 1 + 5 + arguments |
//! | assignment | value + 1 |
//! | ternary / block conditional | 8 / 10 (fixed) |
//! | loop | 50 (fixed) |

use std::fmt;

use crate::value::Value;

/// Operators carried by [`Node::Operation`].
///
/// Binary operators read both operands. The unary forms (`Neg`, `Not`,
/// `Sin`, `Cos`, `Tan`, `Sqrt`) apply to the left operand only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Neg,
    Not,
    Sin,
    Cos,
    Tan,
    Sqrt,
}

impl Operator {
    /// Map an operator token (or compound token) to a binary operator.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "^" => Self::Pow,
            "=" | "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Neg => "-",
            Self::Not => "!",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sqrt => "sqrt",
        }
    }

    /// Binding strength: comparisons 0, additive 1, multiplicative 2, power 3.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 0,
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 3,
            Self::Neg | Self::Not | Self::Sin | Self::Cos | Self::Tan | Self::Sqrt => 4,
        }
    }

    #[must_use]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, Self::Pow)
    }

    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(
            self,
            Self::Neg | Self::Not | Self::Sin | Self::Cos | Self::Tan | Self::Sqrt
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The fixed set of callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Clamp,
    Lerp,
    Atan2,
    Pow,
    Exp,
    Log,
}

/// Accepted argument counts for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    #[must_use]
    pub const fn accepts(self, n: usize) -> bool {
        match self {
            Self::Exactly(k) => n == k,
            Self::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(k) => write!(f, "{k}"),
            Self::AtLeast(k) => write!(f, "at least {k}"),
        }
    }
}

impl Function {
    pub const ALL: [Self; 16] = [
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Sqrt,
        Self::Abs,
        Self::Floor,
        Self::Ceil,
        Self::Round,
        Self::Min,
        Self::Max,
        Self::Clamp,
        Self::Lerp,
        Self::Atan2,
        Self::Pow,
        Self::Exp,
        Self::Log,
    ];

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
            Self::Lerp => "lerp",
            Self::Atan2 => "atan2",
            Self::Pow => "pow",
            Self::Exp => "exp",
            Self::Log => "log",
        }
    }

    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Min | Self::Max => Arity::AtLeast(1),
            Self::Clamp | Self::Lerp => Arity::Exactly(3),
            Self::Atan2 | Self::Pow => Arity::Exactly(2),
            _ => Arity::Exactly(1),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `name` is one of the built-in function names.
#[must_use]
pub fn is_function_name(name: &str) -> bool {
    Function::from_name(name).is_some()
}

/// Syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Numeric, text, or boolean constant. Malformed input also lands here,
    /// holding its raw text.
    Literal(Value),
    /// Reference to a variable by name.
    Variable(String),
    /// `right` is `None` for the unary operator forms.
    Operation {
        op: Operator,
        left: Box<Node>,
        right: Option<Box<Node>>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
    Condition {
        test: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    /// `for binding in start..end { body }`
    Loop {
        binding: String,
        start: Box<Node>,
        end: Box<Node>,
        body: Box<Node>,
    },
    Assignment {
        target: String,
        value: Box<Node>,
    },
}

/// Fixed cost of a ternary conditional.
pub const TERNARY_COMPLEXITY: u32 = 8;
/// Fixed cost of a block conditional.
pub const BLOCK_CONDITION_COMPLEXITY: u32 = 10;
/// Fixed cost of a loop.
pub const LOOP_COMPLEXITY: u32 = 50;

impl Node {
    #[must_use]
    pub fn binary(op: Operator, left: Node, right: Node) -> Self {
        Self::Operation {
            op,
            left: Box::new(left),
            right: Some(Box::new(right)),
        }
    }

    #[must_use]
    pub fn unary(op: Operator, operand: Node) -> Self {
        Self::Operation {
            op,
            left: Box::new(operand),
            right: None,
        }
    }

    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::Literal(Value::Number(n))
    }

    /// Structural complexity. Conditionals and loops are costed by the
    /// parser, which knows their surface form, so here they fall back to the
    /// block and loop constants.
    #[must_use]
    pub fn complexity(&self) -> u32 {
        match self {
            Self::Literal(_) | Self::Variable(_) => 1,
            Self::Operation { left, right, .. } => {
                3 + left.complexity() + right.as_ref().map_or(0, |r| r.complexity())
            }
            Self::Call { args, .. } => 6 + args.iter().map(Node::complexity).sum::<u32>(),
            Self::Assignment { value, .. } => value.complexity() + 1,
            Self::Condition { .. } => BLOCK_CONDITION_COMPLEXITY,
            Self::Loop { .. } => LOOP_COMPLEXITY,
        }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + match self {
            Self::Literal(_) | Self::Variable(_) => 0,
            Self::Operation { left, right, .. } => {
                left.size() + right.as_ref().map_or(0, |r| r.size())
            }
            Self::Call { args, .. } => args.iter().map(Node::size).sum(),
            Self::Condition {
                test,
                then,
                otherwise,
            } => test.size() + then.size() + otherwise.as_ref().map_or(0, |o| o.size()),
            Self::Loop {
                start, end, body, ..
            } => start.size() + end.size() + body.size(),
            Self::Assignment { value, .. } => value.size(),
        }
    }

    /// Whether evaluating this tree writes to any variable.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Self::Assignment { .. } => true,
            Self::Literal(_) | Self::Variable(_) => false,
            Self::Operation { left, right, .. } => {
                left.has_side_effects() || right.as_ref().is_some_and(|r| r.has_side_effects())
            }
            Self::Call { args, .. } => args.iter().any(Node::has_side_effects),
            Self::Condition {
                test,
                then,
                otherwise,
            } => {
                test.has_side_effects()
                    || then.has_side_effects()
                    || otherwise.as_ref().is_some_and(|o| o.has_side_effects())
            }
            Self::Loop {
                start, end, body, ..
            } => start.has_side_effects() || end.has_side_effects() || body.has_side_effects(),
        }
    }
}

/// A parsed expression: the tree plus its scheduling metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// The trimmed source text.
    pub source: String,
    pub root: Node,
    /// Free variables read by the expression, deduplicated, in first-seen
    /// order.
    pub dependencies: Vec<String>,
    pub complexity: u32,
}

impl Expression {
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.root.has_side_effects()
    }
}

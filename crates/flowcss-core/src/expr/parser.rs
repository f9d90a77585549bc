#![forbid(unsafe_code)]

//! Expression parser.
//!
//! [`parse`] is total: it never fails. Input that matches no grammar rule
//! degrades to a text [`Node::Literal`] holding the raw token text, so a bad
//! expression shows up as an odd value rather than an error.
//!
//! # Classification
//!
//! The trimmed source is classified in order:
//!
//! 1. **Assignment** `name = rest` (split on the first `=` that is not part
//!    of `==`). The right side is classified again, without assignment.
//! 2. **Conditional** when the source contains `?`, or starts with `if` and
//!    contains `{`: block form `if c { x } [else { y }]` or ternary
//!    `c ? x : y`.
//! 3. **Loop** when the source contains `for` and `{`:
//!    `for v in range { body }`, where `range` is `end` or `start..end`.
//! 4. **Math** otherwise.
//!
//! A rule whose text does not match literally falls through to math parsing.
//!
//! # Math grammar
//!
//! The main operator is found by scanning tokens right to left at paren
//! depth 0 and keeping the lowest precedence seen. Left-associative operators
//! keep the rightmost candidate on ties and `^` keeps the leftmost, so
//! `a - b - c` is `(a - b) - c` and `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`. An operator
//! at the start of a run or after another operator is unary and never a
//! split point.

use crate::value::Value;

use super::ast::{
    BLOCK_CONDITION_COMPLEXITY, Expression, Function, LOOP_COMPLEXITY, Node, Operator,
    TERNARY_COMPLEXITY, is_function_name,
};
use super::token::{is_identifier, is_keyword, is_number, quoted_text, tokenize};

/// Compile `source` into an [`Expression`].
#[must_use]
pub fn parse(source: &str) -> Expression {
    let source = source.trim();
    let (root, complexity) = classify(source, true);

    let read_source = match &root {
        Node::Assignment { .. } => split_assignment(source).map_or(source, |(_, rest)| rest),
        _ => source,
    };
    let mut bindings = Vec::new();
    collect_loop_bindings(&root, &mut bindings);
    let dependencies = extract_dependencies(read_source)
        .into_iter()
        .filter(|name| !bindings.contains(name))
        .collect();

    Expression {
        source: source.to_string(),
        root,
        dependencies,
        complexity,
    }
}

/// Every identifier-shaped token that is not a function name or keyword,
/// deduplicated, in first-seen order.
///
/// [`parse`] calls this on the right-hand side only for an assignment, so a
/// target that is written but never read (`half = w / 2`) is not listed as a
/// dependency. `x = x + 1` still lists `x`.
#[must_use]
pub fn extract_dependencies(source: &str) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    // Range bounds (`1..n`) arrive as one token.
    for piece in tokenize(source).into_iter().flat_map(|t| t.split("..")) {
        if is_identifier(piece)
            && !is_function_name(piece)
            && !is_keyword(piece)
            && !deps.iter().any(|d| d == piece)
        {
            deps.push(piece.to_string());
        }
    }
    deps
}

fn classify(source: &str, allow_assignment: bool) -> (Node, u32) {
    if allow_assignment && let Some((target, rest)) = split_assignment(source) {
        let (value, complexity) = classify(rest, false);
        let node = Node::Assignment {
            target: target.to_string(),
            value: Box::new(value),
        };
        return (node, complexity + 1);
    }

    if (source.contains('?') || (starts_with_keyword(source, "if") && source.contains('{')))
        && let Some(parsed) = parse_conditional(source)
    {
        return parsed;
    }

    if source.contains("for")
        && source.contains('{')
        && let Some(node) = parse_loop(source)
    {
        return (node, LOOP_COMPLEXITY);
    }

    let node = parse_math(source);
    let complexity = node.complexity();
    (node, complexity)
}

// ---------------------------------------------------------------------------
// Statement forms
// ---------------------------------------------------------------------------

fn split_assignment(source: &str) -> Option<(&str, &str)> {
    let eq = source.find('=')?;
    let target = source[..eq].trim();
    let rest = &source[eq + 1..];
    if rest.starts_with('=') || !is_identifier(target) || is_keyword(target) {
        return None;
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some((target, rest))
}

fn starts_with_keyword(source: &str, keyword: &str) -> bool {
    source
        .strip_prefix(keyword)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == '(' || c == '{')
}

fn parse_conditional(source: &str) -> Option<(Node, u32)> {
    if starts_with_keyword(source, "if") {
        return parse_block_conditional(source);
    }
    let q = source.find('?')?;
    let colon = q + 1 + source[q + 1..].find(':')?;
    let test = source[..q].trim();
    let then = source[q + 1..colon].trim();
    let otherwise = source[colon + 1..].trim();
    if test.is_empty() || then.is_empty() || otherwise.is_empty() {
        return None;
    }
    let node = Node::Condition {
        test: Box::new(parse_math(test)),
        then: Box::new(parse_math(then)),
        otherwise: Some(Box::new(parse_math(otherwise))),
    };
    Some((node, TERNARY_COMPLEXITY))
}

fn parse_block_conditional(source: &str) -> Option<(Node, u32)> {
    let body = &source["if".len()..];
    let open = body.find('{')?;
    let test = body[..open].trim();
    let (then, rest) = braced(&body[open..])?;
    if test.is_empty() || then.is_empty() {
        return None;
    }

    let rest = rest.trim();
    let otherwise = if rest.is_empty() {
        None
    } else {
        let after_else = rest.strip_prefix("else")?.trim_start();
        let (branch, tail) = braced(after_else)?;
        if !tail.trim().is_empty() || branch.is_empty() {
            return None;
        }
        Some(Box::new(parse_math(branch)))
    };

    let node = Node::Condition {
        test: Box::new(parse_math(test)),
        then: Box::new(parse_math(then)),
        otherwise,
    };
    Some((node, BLOCK_CONDITION_COMPLEXITY))
}

fn parse_loop(source: &str) -> Option<Node> {
    if !starts_with_keyword(source, "for") {
        return None;
    }
    let rest = source["for".len()..].trim_start();
    let binding_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let binding = &rest[..binding_len];
    if !is_identifier(binding) || is_keyword(binding) {
        return None;
    }
    let rest = rest[binding_len..].trim_start();
    let rest = rest.strip_prefix("in")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let open = rest.find('{')?;
    let range = rest[..open].trim();
    let (body, tail) = braced(&rest[open..])?;
    if range.is_empty() || body.is_empty() || !tail.trim().is_empty() {
        return None;
    }

    let (start, end) = match range.split_once("..") {
        Some((start, end)) => (parse_math(start), parse_math(end)),
        None => (Node::number(0.0), parse_math(range)),
    };
    Some(Node::Loop {
        binding: binding.to_string(),
        start: Box::new(start),
        end: Box::new(end),
        body: Box::new(parse_math(body)),
    })
}

/// `text` must start with `{`. Returns the trimmed inside of the matching
/// brace pair and everything after it.
fn braced(text: &str) -> Option<(&str, &str)> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((text[1..i].trim(), &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Math expressions
// ---------------------------------------------------------------------------

/// Deepest nesting of parentheses, unary operators and operator chains that
/// [`parse_math`] builds a tree for. Anything deeper degrades to a text
/// literal.
pub const MAX_NESTING: usize = 256;

/// Parse an arithmetic expression (no statement forms).
#[must_use]
pub fn parse_math(source: &str) -> Node {
    let tokens = tokenize(source);
    let mut parser = MathParser::default();
    let node = parser.parse(&tokens);
    if parser.too_deep {
        return fallback(&tokens);
    }
    node
}

#[derive(Default)]
struct MathParser {
    depth: usize,
    too_deep: bool,
}

impl MathParser {
    fn parse(&mut self, tokens: &[&str]) -> Node {
        if self.too_deep || self.depth >= MAX_NESTING {
            self.too_deep = true;
            // Discarded by `parse_math`.
            return Node::number(0.0);
        }
        self.depth += 1;
        let node = self.parse_level(tokens);
        self.depth -= 1;
        node
    }

    fn parse_level(&mut self, tokens: &[&str]) -> Node {
        if tokens.is_empty() {
            return fallback(tokens);
        }

        if tokens[0] == "(" && matching_close(tokens, 0) == Some(tokens.len() - 1) {
            return self.parse(&tokens[1..tokens.len() - 1]);
        }

        if let Some(split) = main_operator(tokens) {
            let left = &tokens[..split.start];
            let right = &tokens[split.end + 1..];
            if left.is_empty() || right.is_empty() {
                return fallback(tokens);
            }
            let left = self.parse(left);
            let right = self.parse(right);
            return Node::binary(split.op, left, right);
        }

        if tokens.len() == 1 {
            return parse_atom(tokens[0]);
        }

        match tokens[0] {
            "-" => return Node::unary(Operator::Neg, self.parse(&tokens[1..])),
            "+" => return self.parse(&tokens[1..]),
            "!" => return Node::unary(Operator::Not, self.parse(&tokens[1..])),
            _ => {}
        }

        if let Some(call) = self.parse_call(tokens) {
            return call;
        }

        fallback(tokens)
    }

    fn parse_call(&mut self, tokens: &[&str]) -> Option<Node> {
        let function = Function::from_name(tokens[0])?;
        if tokens.get(1) != Some(&"(") || matching_close(tokens, 1) != Some(tokens.len() - 1) {
            return None;
        }
        let inner = &tokens[2..tokens.len() - 1];
        let mut args = Vec::new();
        if !inner.is_empty() {
            let mut depth = 0i32;
            let mut start = 0;
            for (i, tok) in inner.iter().enumerate() {
                match *tok {
                    "(" => depth += 1,
                    ")" => depth -= 1,
                    "," if depth == 0 => {
                        args.push(self.parse(&inner[start..i]));
                        start = i + 1;
                    }
                    _ => {}
                }
            }
            args.push(self.parse(&inner[start..]));
        }
        Some(Node::Call { function, args })
    }
}

fn parse_atom(token: &str) -> Node {
    if is_number(token)
        && let Ok(n) = token.parse::<f64>()
    {
        return Node::number(n);
    }
    if let Some(text) = quoted_text(token) {
        return Node::Literal(Value::Text(text.to_string()));
    }
    match token {
        "true" => Node::Literal(Value::Bool(true)),
        "false" => Node::Literal(Value::Bool(false)),
        _ if is_identifier(token) && !is_keyword(token) => Node::Variable(token.to_string()),
        _ => fallback(&[token]),
    }
}

struct Split {
    start: usize,
    end: usize,
    op: Operator,
}

fn main_operator(tokens: &[&str]) -> Option<Split> {
    let mut best: Option<Split> = None;
    let mut depth = 0i32;
    let mut i = tokens.len();
    while i > 0 {
        i -= 1;
        match tokens[i] {
            ")" => {
                depth += 1;
                continue;
            }
            "(" => {
                depth -= 1;
                continue;
            }
            _ if depth != 0 => continue,
            _ => {}
        }

        let (start, symbol) = compound_operator(tokens, i);
        let Some(op) = Operator::from_symbol(&symbol) else {
            i = start;
            continue;
        };
        if start == 0 || is_operator_token(tokens[start - 1]) {
            // Unary position.
            i = start;
            continue;
        }
        let better = match &best {
            None => true,
            Some(b) => {
                op.precedence() < b.op.precedence()
                    || (op.precedence() == b.op.precedence() && op.is_right_associative())
            }
        };
        if better {
            best = Some(Split { start, end: i, op });
        }
        i = start;
    }
    best
}

/// Joins `<`, `>`, `!`, `=` followed by `=` into one operator symbol.
fn compound_operator(tokens: &[&str], i: usize) -> (usize, String) {
    if tokens[i] == "=" && i > 0 && matches!(tokens[i - 1], "<" | ">" | "!" | "=") {
        (i - 1, format!("{}=", tokens[i - 1]))
    } else {
        (i, tokens[i].to_string())
    }
}

fn is_operator_token(token: &str) -> bool {
    matches!(
        token,
        "+" | "-" | "*" | "/" | "^" | "=" | "<" | ">" | "!" | "(" | ","
    )
}

fn matching_close(tokens: &[&str], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match *tok {
            "(" => depth += 1,
            ")" => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn fallback(tokens: &[&str]) -> Node {
    let raw = tokens.join(" ");
    tracing::trace!(message = "parser.fallback", raw = %raw);
    Node::Literal(Value::Text(raw))
}

fn collect_loop_bindings(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Loop { binding, body, .. } => {
            out.push(binding.clone());
            collect_loop_bindings(body, out);
        }
        Node::Assignment { value, .. } => collect_loop_bindings(value, out),
        _ => {}
    }
}

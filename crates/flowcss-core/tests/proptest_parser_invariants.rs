#![forbid(unsafe_code)]

//! Property-based invariant tests for the expression parser.
//!
//! 1. `parse` is total: arbitrary input never panics, however deeply it
//!    nests.
//! 2. Expressions without identifiers have no dependencies.
//! 3. Dependencies are exactly the variables referenced, regardless of
//!    nesting, with function names excluded.
//! 4. Dependencies never contain duplicates.
//! 5. Wrapping an expression in a function call or an operation strictly
//!    raises its complexity.

use std::collections::BTreeSet;

use flowcss_core::expr::{MAX_NESTING, Node, parse};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

const VARS: &[&str] = &["a", "b", "mouseX", "time", "w_2"];
const UNARY_FNS: &[&str] = &["sin", "cos", "sqrt", "abs", "floor", "exp"];
const OPS: &[&str] = &["+", "-", "*", "/", "^"];
const WRAPPERS: &[&str] = &["(", "abs(", "- ", "! "];

fn number() -> impl Strategy<Value = String> {
    (0u32..1000, prop::option::of(0u32..100)).prop_map(|(int, frac)| match frac {
        Some(f) => format!("{int}.{f}"),
        None => int.to_string(),
    })
}

fn expression(leaf: BoxedStrategy<String>) -> impl Strategy<Value = String> {
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(OPS), inner.clone())
                .prop_map(|(l, op, r)| format!("{l} {op} {r}")),
            inner.clone().prop_map(|e| format!("({e})")),
            (prop::sample::select(UNARY_FNS), inner.clone())
                .prop_map(|(f, e)| format!("{f}({e})")),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| format!("max({x}, {y})")),
        ]
    })
}

fn numeric_expression() -> impl Strategy<Value = String> {
    expression(number().boxed())
}

fn variable_expression() -> impl Strategy<Value = String> {
    expression(
        prop_oneof![
            number(),
            prop::sample::select(VARS).prop_map(str::to_string),
        ]
        .boxed(),
    )
}

fn referenced_vars(source: &str) -> BTreeSet<String> {
    VARS.iter()
        .filter(|v| {
            source
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .any(|piece| piece == **v)
        })
        .map(|v| v.to_string())
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// 1. parse is total
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn parse_never_panics(source in ".{0,64}") {
        let expr = parse(&source);
        prop_assert_eq!(expr.source.as_str(), source.trim());
    }

    #[test]
    fn parse_never_panics_on_operator_soup(source in "[a-z0-9+*/^()=<>!,?:{}. -]{0,48}") {
        let _ = parse(&source);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn deep_nesting_degrades_instead_of_overflowing(
        depth in 0usize..4_000,
        wrapper in prop::sample::select(WRAPPERS),
    ) {
        let closing = if wrapper.ends_with('(') { ")" } else { "" };
        let source = format!("{}a{}", wrapper.repeat(depth), closing.repeat(depth));
        let expr = parse(&source);
        prop_assert_eq!(expr.dependencies, vec!["a".to_string()]);
        if depth >= MAX_NESTING {
            prop_assert!(matches!(expr.root, Node::Literal(_)));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. No identifiers → no dependencies
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn numeric_expressions_have_no_dependencies(source in numeric_expression()) {
        let expr = parse(&source);
        prop_assert!(expr.dependencies.is_empty(),
            "unexpected dependencies {:?} for {}", expr.dependencies, source);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3 & 4. Dependencies are exact and deduplicated
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn dependencies_match_referenced_variables(source in variable_expression()) {
        let expr = parse(&source);
        let got: BTreeSet<String> = expr.dependencies.iter().cloned().collect();
        prop_assert_eq!(got.len(), expr.dependencies.len(), "duplicates in {:?}", expr.dependencies);
        prop_assert_eq!(got, referenced_vars(&source));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Complexity is monotonic under wrapping
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn wrapping_raises_complexity(source in variable_expression()) {
        let base = parse(&source);
        prop_assume!(!matches!(base.root, Node::Literal(_)));

        let called = parse(&format!("sin({source})"));
        prop_assert!(called.complexity > base.complexity);

        let added = parse(&format!("({source}) + 1"));
        prop_assert!(added.complexity > base.complexity);
    }
}

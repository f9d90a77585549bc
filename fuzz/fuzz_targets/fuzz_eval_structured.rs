#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use flowcss_core::Value;
use flowcss_core::expr::parse;
use flowcss_runtime::eval::{Machine, Program, Step};
use libfuzzer_sys::fuzz_target;

const VARS: [&str; 3] = ["a", "b", "t"];
const FUNCS: [&str; 6] = ["sin", "abs", "floor", "sqrt", "exp", "log"];
const OPS: [&str; 9] = ["+", "-", "*", "/", "^", "<", ">", "==", "!="];

#[derive(Arbitrary, Debug)]
enum FuzzExpr {
    Number(i16),
    Var(u8),
    Text(u8),
    Binary(Box<FuzzExpr>, u8, Box<FuzzExpr>),
    Call(u8, Box<FuzzExpr>),
    Clamp(Box<FuzzExpr>, Box<FuzzExpr>, Box<FuzzExpr>),
    Ternary(Box<FuzzExpr>, Box<FuzzExpr>, Box<FuzzExpr>),
    Loop(u8, Box<FuzzExpr>),
}

impl FuzzExpr {
    fn render(&self, depth: u32) -> String {
        if depth > 6 {
            return "1".to_string();
        }
        let d = depth + 1;
        match self {
            Self::Number(n) => n.unsigned_abs().to_string(),
            Self::Var(i) => VARS[*i as usize % VARS.len()].to_string(),
            Self::Text(i) => format!("'t{i}'"),
            Self::Binary(l, op, r) => format!(
                "({} {} {})",
                l.render(d),
                OPS[*op as usize % OPS.len()],
                r.render(d)
            ),
            Self::Call(f, arg) => format!("{}({})", FUNCS[*f as usize % FUNCS.len()], arg.render(d)),
            Self::Clamp(x, lo, hi) => {
                format!("clamp({}, {}, {})", x.render(d), lo.render(d), hi.render(d))
            }
            Self::Ternary(c, t, e) => format!("{} ? {} : {}", c.render(d), t.render(d), e.render(d)),
            Self::Loop(n, body) => format!("for i in {} {{ {} }}", n % 64, body.render(d)),
        }
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

fuzz_target!(|input: (FuzzExpr, i16, i16, u8)| {
    let (expr, a, b, quota) = input;
    let source = expr.render(0);
    let parsed = parse(&source);
    let Ok(program) = Program::compile(&parsed.root) else {
        return;
    };
    let mut scope: HashMap<String, Value> = HashMap::new();
    scope.insert("a".into(), Value::from(i32::from(a)));
    scope.insert("b".into(), Value::from(i32::from(b)));
    scope.insert("t".into(), Value::Number(0.5));

    let whole = Machine::new().run_to_end(&program, &mut scope);

    // Running in slices must reach the same result.
    let quota = usize::from(quota % 16) + 1;
    let mut machine = Machine::new();
    let sliced = loop {
        match machine.run(&program, &mut scope, Some(quota)) {
            Ok(Step::Done(value)) => break Ok(value),
            Ok(Step::Suspended) => {}
            Err(err) => break Err(err),
        }
    };
    match (whole, sliced) {
        (Ok(x), Ok(y)) => assert!(same(&x, &y), "{source}: {x} vs {y}"),
        (Err(x), Err(y)) => assert_eq!(x, y, "{source}"),
        (x, y) => panic!("{source}: {x:?} vs {y:?}"),
    }
});

#![no_main]

use flowcss_core::expr::parse;
use flowcss_runtime::eval::Program;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);
    let expr = parse(&source);
    for (i, dep) in expr.dependencies.iter().enumerate() {
        assert!(!expr.dependencies[..i].contains(dep), "duplicate dependency {dep}");
    }
    let _ = Program::compile(&expr.root);
});

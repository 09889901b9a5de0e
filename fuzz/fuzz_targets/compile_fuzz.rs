//! Compiler and decoder fuzz target: compile arbitrary text as a map (collecting every error),
//! then decode the same bytes with whatever compiled. Neither step may panic.
//! Build with: cargo fuzz run compile_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let options = structmap::CompileOptions { stop_on_first_error: false, file_name: None };
    let compiled = structmap::compile(s, &options);
    let _ = compiled.error_log();
    let evaluator = structmap::ExprEvaluator::new();
    let _ = structmap::identify(&compiled.map, &evaluator, data, structmap::Endianness::Big);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run compile_fuzz");
}

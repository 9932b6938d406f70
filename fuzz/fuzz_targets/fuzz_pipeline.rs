#![no_main]

use libfuzzer_sys::fuzz_target;
use thrud_analysis::ReuseOptions;
use thrud_opt::{CoarseningOptions, KernelSelection, Pass, ThreadCoarsening, check_reuse};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut module) = thrud_parser::parse(source) else {
        return;
    };
    // Analysis and coarsening of any parsed module should never panic.
    let _ = check_reuse(&module, &KernelSelection::all(), &ReuseOptions::default());
    let options = CoarseningOptions {
        factor: 2,
        ..CoarseningOptions::default()
    };
    ThreadCoarsening::new(KernelSelection::all(), options).run(&mut module);
});

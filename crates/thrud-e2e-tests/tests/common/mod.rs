use thrud_analysis::{CoarseningMode, TaintDivergence};
use thrud_ir::{Module, Opcode};
use thrud_opt::{CoarseningOptions, coarsen};

/// Every sample kernel, by file stem.
#[allow(dead_code)]
pub const KERNELS: [(&str, &str); 6] = [
    ("vadd", include_str!("../../../../kernels/vadd.tir")),
    ("memcpy", include_str!("../../../../kernels/memcpy.tir")),
    ("groupid", include_str!("../../../../kernels/groupid.tir")),
    ("mm", include_str!("../../../../kernels/mm.tir")),
    ("gather", include_str!("../../../../kernels/gather.tir")),
    ("reverse", include_str!("../../../../kernels/reverse.tir")),
];

/// Parse one of the sample kernels.
#[allow(dead_code)]
pub fn load(stem: &str) -> Module {
    let (_, source) = KERNELS
        .iter()
        .find(|(name, _)| *name == stem)
        .unwrap_or_else(|| panic!("no sample kernel '{stem}'"));
    thrud_parser::parse(source).expect("sample kernel parse failed")
}

/// Thread-level options along direction 0.
#[allow(dead_code)]
pub fn thread_level(factor: u32) -> CoarseningOptions {
    CoarseningOptions {
        factor,
        mode: CoarseningMode::ThreadLevel,
        ..CoarseningOptions::default()
    }
}

/// Coarsen the first kernel with taint-based divergence.
#[allow(dead_code)]
pub fn coarsened(stem: &str, options: &CoarseningOptions) -> Module {
    let mut module = load(stem);
    let result = coarsen(&mut module, 0, options, &TaintDivergence).expect("coarsening failed");
    assert_eq!(result.unresolved, 0, "{stem}: placeholders left behind");
    module
}

#[allow(dead_code)]
pub fn count_stores(module: &Module) -> usize {
    let k = &module.kernels[0];
    k.instructions()
        .into_iter()
        .filter(|&h| matches!(k[h].opcode, Opcode::Store { .. }))
        .count()
}

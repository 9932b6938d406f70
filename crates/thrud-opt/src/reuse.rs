//! Cache-line reuse check.
//!
//! Runs the reuse analysis over the selected kernels and logs one outcome
//! line per kernel. Never modifies the module.

use thrud_analysis::{LoopInfo, NdRange, ReuseOptions, ReuseOutcome, analyze_reuse};
use thrud_ir::Module;

use crate::{KernelSelection, Pass};

#[derive(Debug)]
pub struct ReuseCheck {
    selection: KernelSelection,
    options: ReuseOptions,
}

impl ReuseCheck {
    pub fn new(selection: KernelSelection, options: ReuseOptions) -> Self {
        Self { selection, options }
    }
}

impl Pass for ReuseCheck {
    fn name(&self) -> &str {
        "clr"
    }

    fn run(&self, module: &mut Module) -> bool {
        for (kernel, outcome) in check_reuse(module, &self.selection, &self.options) {
            log::info!("{kernel}: {outcome}");
        }
        false
    }
}

/// Reuse outcome of every selected kernel, by kernel name.
pub fn check_reuse(
    module: &Module,
    selection: &KernelSelection,
    options: &ReuseOptions,
) -> Vec<(String, ReuseOutcome)> {
    module
        .kernels
        .iter()
        .filter(|k| selection.matches(k))
        .map(|kernel| {
            let ndr = NdRange::analyze(kernel);
            let loops = LoopInfo::analyze(kernel);
            let outcome = analyze_reuse(module, kernel, &ndr, &loops, options);
            (kernel.name.clone(), outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use thrud_ir::dump_module;

    use super::*;

    #[test]
    fn one_outcome_per_selected_kernel() {
        let src = r#"
kernel @copy(ptr global %a, ptr global %b) {
entry:
  %gid = call i64 @get_global_id(0)
  %pa = gep ptr global %a, %gid
  %v = load i32, %pa, align 4
  %pb = gep ptr global %b, %gid
  store i32 %v, %pb, align 4
  ret
}
kernel @bcast(ptr global %buf) {
entry:
  %g = call i64 @get_group_id(0)
  %p = gep ptr global %buf, %g
  %v = load i32, %p, align 4
  ret
}
"#;
        let mut module = thrud_parser::parse(src).unwrap();
        let all = check_reuse(&module, &KernelSelection::all(), &ReuseOptions::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], ("copy".to_string(), ReuseOutcome::NoReuse));
        assert_eq!(all[1].1.to_string(), "Cache line re-use in access to [buf]");

        let one = check_reuse(&module, &KernelSelection::named("bcast"), &ReuseOptions::default());
        assert_eq!(one.len(), 1);

        let before = dump_module(&module);
        let pass = ReuseCheck::new(KernelSelection::all(), ReuseOptions::default());
        assert!(!pass.run(&mut module));
        assert_eq!(dump_module(&module), before);
    }
}

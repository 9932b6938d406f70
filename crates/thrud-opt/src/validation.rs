//! IR validation pass.
//!
//! Checks structural invariants of every kernel and logs warnings for
//! problems found. This pass never modifies the module.

use thrud_ir::{Kernel, Module, Value, block_name, value_name};

use crate::Pass;

/// Validates IR structural invariants. Returns `false` (never modifies the module).
#[derive(Debug)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "validate"
    }

    fn run(&self, module: &mut Module) -> bool {
        for issue in validate_module(module) {
            log::warn!("{issue}");
        }
        false
    }
}

/// Every structural problem of the module, one message each.
pub fn validate_module(module: &Module) -> Vec<String> {
    let mut issues = Vec::new();
    for kernel in &module.kernels {
        validate_kernel(module, kernel, &mut issues);
    }
    issues
}

fn validate_kernel(module: &Module, kernel: &Kernel, issues: &mut Vec<String>) {
    let name = &kernel.name;
    for &block in kernel.layout() {
        let bname = block_name(kernel, block);
        let insts = kernel.block(block).instructions();

        match insts.last() {
            Some(&last) if kernel[last].is_terminator() => {}
            _ => issues.push(format!("{name}: block '{bname}' does not end in a terminator")),
        }
        let mut seen_non_phi = false;
        for (i, &h) in insts.iter().enumerate() {
            let inst = &kernel[h];
            if inst.is_terminator() && i + 1 != insts.len() {
                issues.push(format!("{name}: terminator in the middle of block '{bname}'"));
            }
            if inst.is_phi() {
                if seen_non_phi {
                    issues.push(format!(
                        "{name}: phi '%{}' after a non-phi in block '{bname}'",
                        value_name(kernel, h)
                    ));
                }
            } else {
                seen_non_phi = true;
            }

            for op in inst.operands() {
                let dangling = match *op {
                    Value::Inst(def) => !kernel.is_live(def),
                    Value::Param(p) => p as usize >= kernel.params.len(),
                    Value::Global(g) => !module.globals.contains(g),
                    Value::Const(_) | Value::Undef => false,
                };
                if dangling {
                    issues.push(format!(
                        "{name}: '%{}' in block '{bname}' references a missing value {op:?}",
                        value_name(kernel, h)
                    ));
                }
            }
            for target in inst.successors() {
                if !kernel.layout().contains(&target) {
                    issues.push(format!(
                        "{name}: block '{bname}' branches to a block outside the layout"
                    ));
                }
            }
        }

        let preds = kernel.predecessors(block);
        for &h in insts.iter().take_while(|&&h| kernel[h].is_phi()) {
            let incoming: Vec<_> = kernel[h].incoming().into_iter().map(|(b, _)| b).collect();
            if incoming.len() != kernel[h].operands().len() {
                issues.push(format!(
                    "{name}: phi '%{}' has mismatched incoming lists",
                    value_name(kernel, h)
                ));
            }
            for from in &incoming {
                if !preds.contains(from) {
                    issues.push(format!(
                        "{name}: phi '%{}' merges from '{}', which is not a predecessor of '{bname}'",
                        value_name(kernel, h),
                        block_name(kernel, *from)
                    ));
                }
            }
            for pred in &preds {
                if !incoming.contains(pred) {
                    issues.push(format!(
                        "{name}: phi '%{}' has no value for predecessor '{}'",
                        value_name(kernel, h),
                        block_name(kernel, *pred)
                    ));
                }
            }
        }
    }
}

//! No-alias annotation.
//!
//! Marks every pointer parameter of the selected kernels as not aliasing
//! any other parameter.

use thrud_ir::Module;

use crate::{KernelSelection, Pass};

/// Adds `noalias` to pointer parameters that lack it.
#[derive(Debug)]
pub struct AssumeRestrict {
    selection: KernelSelection,
}

impl AssumeRestrict {
    pub fn new(selection: KernelSelection) -> Self {
        Self { selection }
    }
}

impl Pass for AssumeRestrict {
    fn name(&self) -> &str {
        "assume-restrict"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for kernel in &mut module.kernels {
            if !self.selection.matches(kernel) {
                continue;
            }
            for param in &mut kernel.params {
                if param.ty.is_pointer() && !param.noalias {
                    log::debug!("{}: '{}' marked noalias", kernel.name, param.name);
                    param.noalias = true;
                    changed = true;
                }
            }
        }
        changed
    }
}

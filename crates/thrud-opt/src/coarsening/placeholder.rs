//! Stand-ins for copies that do not exist yet.
//!
//! A clone can read a divergent value whose own copies are created later
//! (a loop-carried phi input, or a value defined inside a region replicated
//! after the clone). Such operands are pointed at a placeholder: a detached
//! duplicate of the original instruction placed right after it. Once every
//! real copy exists, [`Placeholders::resolve`] redirects the placeholder's
//! uses and erases it.

use indexmap::IndexMap;
use thrud_ir::{Handle, Instruction, IrError, Kernel, Value, value_name};

#[derive(Debug, Default)]
pub(super) struct Placeholders {
    /// `(original, copy index) -> placeholder`, in allocation order.
    slots: IndexMap<(Handle<Instruction>, usize), Handle<Instruction>>,
}

impl Placeholders {
    /// The placeholder for copy `index` of `original`, allocated on first request.
    pub(super) fn get_or_insert(
        &mut self,
        kernel: &mut Kernel,
        original: Handle<Instruction>,
        index: usize,
    ) -> Result<Handle<Instruction>, IrError> {
        if let Some(&placeholder) = self.slots.get(&(original, index)) {
            return Ok(placeholder);
        }
        let mut stand_in = kernel.clone_instruction(original);
        stand_in.name = Some(format!(
            "{}.place.holder..cf{}",
            value_name(kernel, original),
            index + 2
        ));
        let placeholder = kernel.insert_after(original, stand_in)?;
        self.slots.insert((original, index), placeholder);
        Ok(placeholder)
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Replaces every placeholder with the real copy recorded in `clones`
    /// and erases it. Placeholders without a real copy stay in place and are
    /// counted.
    pub(super) fn resolve(
        self,
        kernel: &mut Kernel,
        clones: &IndexMap<Handle<Instruction>, Vec<Handle<Instruction>>>,
    ) -> Result<usize, IrError> {
        let mut unresolved = 0;
        for ((original, index), placeholder) in self.slots {
            match clones.get(&original).and_then(|c| c.get(index)) {
                Some(&copy) => {
                    kernel.replace_all_uses_with(placeholder, Value::Inst(copy));
                    kernel.erase(placeholder)?;
                }
                None => {
                    log::warn!(
                        "{}: no copy #{} of '{}', placeholder kept",
                        kernel.name,
                        index + 2,
                        value_name(kernel, original)
                    );
                    unresolved += 1;
                }
            }
        }
        Ok(unresolved)
    }
}

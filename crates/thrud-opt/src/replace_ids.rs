//! Global-id decomposition.
//!
//! Rewrites `get_global_id(d)` as `get_group_id(d) * get_local_size(d) +
//! get_local_id(d)`, so that block-level coarsening, which rescales group
//! ids, also moves the global ids derived from them.

use thrud_analysis::{CoordinateKind, NdRange};
use thrud_ir::{BinaryOp, Instruction, IrError, Kernel, Module, Opcode, Value, value_name};

use crate::{KernelSelection, Pass};

/// Decomposes the global ids of one direction.
#[derive(Debug)]
pub struct ReplaceGlobalIds {
    selection: KernelSelection,
    direction: u32,
}

impl ReplaceGlobalIds {
    pub fn new(selection: KernelSelection, direction: u32) -> Self {
        Self {
            selection,
            direction,
        }
    }
}

impl Pass for ReplaceGlobalIds {
    fn name(&self) -> &str {
        "replace-gids"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for kernel in &mut module.kernels {
            if !self.selection.matches(kernel) {
                continue;
            }
            match replace_global_ids(kernel, self.direction) {
                Ok(n) => changed |= n > 0,
                Err(e) => log::warn!("{}: global ids not replaced: {e}", kernel.name),
            }
        }
        changed
    }
}

/// Decomposes every global id of `direction` in `kernel` and erases the
/// original calls. Returns the number of rewritten calls.
pub fn replace_global_ids(kernel: &mut Kernel, direction: u32) -> Result<usize, IrError> {
    let mut ndr = NdRange::analyze(kernel);
    let gids = ndr.global_ids(direction).to_vec();
    for &gid in &gids {
        let name = value_name(kernel, gid);
        let original_name = kernel[gid].name.clone();
        let ty = kernel[gid].ty;
        let query = |kind: CoordinateKind, suffix: &str| {
            Instruction::new(
                Opcode::Call {
                    callee: kind.builtin().to_string(),
                },
                ty,
                vec![Value::Const(i64::from(direction))],
            )
            .with_name(format!("{name}.{suffix}"))
        };

        let group = kernel.insert_after(gid, query(CoordinateKind::GroupId, "grp"))?;
        let size = kernel.insert_after(group, query(CoordinateKind::LocalSize, "lsz"))?;
        let local = kernel.insert_after(size, query(CoordinateKind::LocalId, "lid"))?;
        let offset = kernel.insert_after(
            local,
            Instruction::new(
                Opcode::Binary(BinaryOp::Mul),
                ty,
                vec![Value::Inst(group), Value::Inst(size)],
            )
            .with_name(format!("{name}.off")),
        )?;
        let sum = kernel.insert_after(
            offset,
            Instruction::new(
                Opcode::Binary(BinaryOp::Add),
                ty,
                vec![Value::Inst(offset), Value::Inst(local)],
            ),
        )?;
        ndr.register(CoordinateKind::GroupId, direction, group);
        ndr.register(CoordinateKind::LocalSize, direction, size);
        ndr.register(CoordinateKind::LocalId, direction, local);

        kernel.replace_all_uses_with(gid, Value::Inst(sum));
        kernel.erase(gid)?;
        ndr.unregister(gid);
        // The sum takes over the id's name.
        kernel.inst_mut(sum).name = original_name;
    }
    log::debug!(
        "{}: {} global ids along direction {direction} decomposed, {} index queries left",
        kernel.name,
        gids.len(),
        ndr.len()
    );
    Ok(gids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
kernel @k(ptr global %out) {
entry:
  %gid = call i64 @get_global_id(0)
  %y = call i64 @get_global_id(1)
  %p = gep ptr global %out, %gid
  store i64 %y, %p, align 8
  ret
}
"#;

    #[test]
    fn decomposes_ids_of_one_direction() {
        let mut module = thrud_parser::parse(SRC).unwrap();
        let k = &mut module.kernels[0];
        assert_eq!(replace_global_ids(k, 0).unwrap(), 1);

        let gid = k.find("gid").unwrap();
        assert!(matches!(k[gid].opcode, Opcode::Binary(BinaryOp::Add)));
        let off = k.find("gid.off").unwrap();
        assert_eq!(
            k[gid].operands(),
            &[Value::Inst(off), Value::Inst(k.find("gid.lid").unwrap())]
        );
        assert_eq!(
            k[off].operands(),
            &[
                Value::Inst(k.find("gid.grp").unwrap()),
                Value::Inst(k.find("gid.lsz").unwrap())
            ]
        );
        assert_eq!(k[k.find("gid.grp").unwrap()].callee(), Some("get_group_id"));
        let p = k.find("p").unwrap();
        assert_eq!(k[p].operand(1), Some(Value::Inst(gid)));

        let ndr = NdRange::analyze(k);
        assert!(ndr.global_ids(0).is_empty());
        assert_eq!(ndr.global_ids(1).len(), 1);
        assert_eq!(ndr.local_ids(0).len(), 1);
    }

    #[test]
    fn no_ids_is_a_noop() {
        let mut module = thrud_parser::parse(SRC).unwrap();
        let pass = ReplaceGlobalIds::new(KernelSelection::all(), 2);
        assert!(!pass.run(&mut module));
        let pass = ReplaceGlobalIds::new(KernelSelection::all(), 1);
        assert!(pass.run(&mut module));
        assert!(!pass.run(&mut module));
    }
}

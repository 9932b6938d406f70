//! Index-space rescaling.
//!
//! After folding, a launch has `factor` times fewer work items (or work
//! groups) along the coarsening direction. Size queries are multiplied back
//! to the logical size, and id queries are mapped to the id of the first
//! logical item handled by the folded one. The ids of the remaining logical
//! items are generated right after the rescaled base and recorded as id
//! copies for the cloning step.

use thrud_analysis::CoarseningMode;
use thrud_ir::{BinaryOp, Handle, Instruction, IrError, Opcode, Type, Value, value_name};

use super::Coarsener;

fn binary(op: BinaryOp, ty: Type, lhs: Value, rhs: Value, name: String) -> Instruction {
    Instruction::new(Opcode::Binary(op), ty, vec![lhs, rhs]).with_name(name)
}

impl Coarsener<'_> {
    pub(super) fn scale_ndrange(&mut self) -> Result<(), IrError> {
        self.scale_sizes()?;
        self.scale_ids()
    }

    fn scale_sizes(&mut self) -> Result<(), IrError> {
        let d = self.options.direction;
        let sizes = match self.options.mode {
            CoarseningMode::ThreadLevel => self.ndr.sizes(d),
            CoarseningMode::BlockLevel => {
                let mut sizes = self.ndr.global_sizes(d).to_vec();
                sizes.extend_from_slice(self.ndr.group_counts(d));
                sizes
            }
        };
        let factor = i64::from(self.options.factor);
        for size in sizes {
            let name = format!("{}..scaled", value_name(self.kernel, size));
            let ty = self.kernel[size].ty;
            let scaled = self.kernel.insert_after(
                size,
                binary(BinaryOp::Mul, ty, Value::Inst(size), Value::Const(factor), name),
            )?;
            self.kernel.replace_uses_except(size, Value::Inst(scaled), &[scaled]);
            self.result.scaled_sizes.push(scaled);
        }
        Ok(())
    }

    fn scale_ids(&mut self) -> Result<(), IrError> {
        let d = self.options.direction;
        match self.options.mode {
            CoarseningMode::ThreadLevel => {
                for id in self.ndr.divergent_ids(d) {
                    self.scale_thread_id(id)?;
                }
            }
            CoarseningMode::BlockLevel => {
                let ndr = self.ndr;
                for &group in ndr.group_ids(d) {
                    self.scale_group_id(group)?;
                }
            }
        }
        Ok(())
    }

    /// `base = (id / stride) * (factor * stride) + id % stride`, copies
    /// `base + k * stride`.
    fn scale_thread_id(&mut self, id: Handle<Instruction>) -> Result<(), IrError> {
        let n = value_name(self.kernel, id);
        let ty = self.kernel[id].ty;
        let stride = i64::from(self.options.stride);
        let factor = i64::from(self.options.factor);
        let original = Value::Inst(id);

        let div = self.kernel.insert_after(
            id,
            binary(BinaryOp::UDiv, ty, original, Value::Const(stride), format!("{n}..div")),
        )?;
        let mul = self.kernel.insert_after(
            div,
            binary(
                BinaryOp::Mul,
                ty,
                Value::Inst(div),
                Value::Const(factor * stride),
                format!("{n}..mul"),
            ),
        )?;
        let rem = self.kernel.insert_after(
            mul,
            binary(BinaryOp::URem, ty, original, Value::Const(stride), format!("{n}..rem")),
        )?;
        let base = self.kernel.insert_after(
            rem,
            binary(BinaryOp::Add, ty, Value::Inst(mul), Value::Inst(rem), format!("{n}..base")),
        )?;
        self.kernel.replace_uses_except(id, Value::Inst(base), &[div, rem]);
        self.generate_ids(base, &n, stride)
    }

    /// `base = group * factor`, copies `base + k`.
    fn scale_group_id(&mut self, group: Handle<Instruction>) -> Result<(), IrError> {
        let n = value_name(self.kernel, group);
        let ty = self.kernel[group].ty;
        let factor = i64::from(self.options.factor);
        let base = self.kernel.insert_after(
            group,
            binary(
                BinaryOp::Mul,
                ty,
                Value::Inst(group),
                Value::Const(factor),
                format!("{n}..base"),
            ),
        )?;
        self.kernel.replace_uses_except(group, Value::Inst(base), &[base]);
        self.generate_ids(base, &n, 1)
    }

    fn generate_ids(&mut self, base: Handle<Instruction>, name: &str, step: i64) -> Result<(), IrError> {
        let ty = self.kernel[base].ty;
        let mut anchor = base;
        let mut copies = Vec::with_capacity(self.copies());
        for index in 0..self.copies() {
            let offset = (index as i64 + 1) * step;
            let copy = self.kernel.insert_after(
                anchor,
                binary(
                    BinaryOp::Add,
                    ty,
                    Value::Inst(base),
                    Value::Const(offset),
                    super::copy_name(name, index),
                ),
            )?;
            copies.push(copy);
            anchor = copy;
        }
        self.result.id_copies.insert(base, copies);
        Ok(())
    }
}

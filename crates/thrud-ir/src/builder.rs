//! Positioned instruction builder.

use crate::arena::Handle;
use crate::instr::{BinaryOp, CastOp, CmpPredicate, Instruction, Opcode, Value};
use crate::kernel::{Block, Kernel};
use crate::types::Type;

/// Appends instructions at the end of the current block.
///
/// An empty `name` leaves the value unnamed.
pub struct KernelBuilder<'k> {
    kernel: &'k mut Kernel,
    block: Handle<Block>,
}

impl<'k> KernelBuilder<'k> {
    /// Creates a builder positioned at the end of `block`.
    pub fn new(kernel: &'k mut Kernel, block: Handle<Block>) -> Self {
        Self { kernel, block }
    }

    pub fn position_at_end(&mut self, block: Handle<Block>) {
        self.block = block;
    }

    pub fn block(&self) -> Handle<Block> {
        self.block
    }

    pub fn kernel(&mut self) -> &mut Kernel {
        self.kernel
    }

    /// Appends a fully formed instruction.
    pub fn push(&mut self, inst: Instruction) -> Handle<Instruction> {
        self.kernel.append(self.block, inst)
    }

    fn value(&mut self, opcode: Opcode, ty: Type, operands: Vec<Value>, name: &str) -> Value {
        let mut inst = Instruction::new(opcode, ty, operands);
        if !name.is_empty() {
            inst.name = Some(name.to_string());
        }
        Value::Inst(self.push(inst))
    }

    pub fn binary(&mut self, op: BinaryOp, ty: Type, lhs: Value, rhs: Value, name: &str) -> Value {
        self.value(Opcode::Binary(op), ty, vec![lhs, rhs], name)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
        let ty = self.kernel.value_type(lhs);
        self.binary(BinaryOp::Add, ty, lhs, rhs, name)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
        let ty = self.kernel.value_type(lhs);
        self.binary(BinaryOp::Mul, ty, lhs, rhs, name)
    }

    pub fn icmp(&mut self, pred: CmpPredicate, lhs: Value, rhs: Value, name: &str) -> Value {
        self.value(Opcode::ICmp(pred), Type::BOOL, vec![lhs, rhs], name)
    }

    pub fn select(&mut self, ty: Type, cond: Value, accept: Value, reject: Value, name: &str) -> Value {
        self.value(Opcode::Select, ty, vec![cond, accept, reject], name)
    }

    pub fn cast(&mut self, op: CastOp, ty: Type, value: Value, name: &str) -> Value {
        self.value(Opcode::Cast(op), ty, vec![value], name)
    }

    pub fn phi(&mut self, ty: Type, incoming: &[(Value, Handle<Block>)], name: &str) -> Value {
        let (values, blocks): (Vec<Value>, Vec<Handle<Block>>) = incoming.iter().copied().unzip();
        self.value(Opcode::Phi { incoming: blocks }, ty, values, name)
    }

    pub fn load(&mut self, ty: Type, pointer: Value, align: u32, name: &str) -> Value {
        self.value(Opcode::Load { align }, ty, vec![pointer], name)
    }

    pub fn store(&mut self, value: Value, pointer: Value, align: u32) -> Handle<Instruction> {
        self.push(Instruction::new(
            Opcode::Store {
                align,
                volatile: false,
            },
            Type::Void,
            vec![value, pointer],
        ))
    }

    /// A store the compiler may not remove or reorder.
    pub fn store_volatile(&mut self, value: Value, pointer: Value, align: u32) -> Handle<Instruction> {
        self.push(Instruction::new(
            Opcode::Store {
                align,
                volatile: true,
            },
            Type::Void,
            vec![value, pointer],
        ))
    }

    /// Address-index step: `base + index` elements. The result has the base's pointer type.
    pub fn gep(&mut self, ty: Type, base: Value, index: Value, name: &str) -> Value {
        self.value(Opcode::GetElementPtr, ty, vec![base, index], name)
    }

    pub fn call(&mut self, ty: Type, callee: &str, args: Vec<Value>, name: &str) -> Value {
        self.value(
            Opcode::Call {
                callee: callee.to_string(),
            },
            ty,
            args,
            name,
        )
    }

    /// Call to a built-in index-space query taking a literal direction.
    pub fn coordinate(&mut self, callee: &str, direction: u32, name: &str) -> Value {
        self.call(Type::I64, callee, vec![Value::Const(i64::from(direction))], name)
    }

    pub fn other(&mut self, mnemonic: &str, ty: Type, operands: Vec<Value>, name: &str) -> Value {
        self.value(Opcode::Other(mnemonic.to_string()), ty, operands, name)
    }

    pub fn br(&mut self, target: Handle<Block>) -> Handle<Instruction> {
        self.push(Instruction::new(Opcode::Br { target }, Type::Void, vec![]))
    }

    pub fn cond_br(&mut self, cond: Value, accept: Handle<Block>, reject: Handle<Block>) -> Handle<Instruction> {
        self.push(Instruction::new(
            Opcode::CondBr { accept, reject },
            Type::Void,
            vec![cond],
        ))
    }

    pub fn ret(&mut self) -> Handle<Instruction> {
        self.push(Instruction::new(Opcode::Ret, Type::Void, vec![]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressSpace;

    #[test]
    fn build_indexed_store() {
        let mut kernel = Kernel::new("fill");
        let buf = kernel.add_param("buf", Type::Ptr(AddressSpace::Global));
        let entry = kernel.add_block("entry");
        let mut b = KernelBuilder::new(&mut kernel, entry);
        let gid = b.coordinate("get_global_id", 0, "gid");
        let ptr = b.gep(Type::Ptr(AddressSpace::Global), buf, gid, "ptr");
        b.store(Value::Const(1), ptr, 4);
        b.ret();

        assert_eq!(kernel.instructions().len(), 4);
        let gid = kernel.find("gid").unwrap();
        assert_eq!(kernel[gid].callee(), Some("get_global_id"));
        assert_eq!(kernel[gid].operands(), &[Value::Const(0)]);
        assert_eq!(kernel.users(gid).len(), 1);
    }

    #[test]
    fn phi_keeps_incoming_pairs() {
        let mut kernel = Kernel::new("loop");
        let entry = kernel.add_block("entry");
        let header = kernel.add_block("header");
        let mut b = KernelBuilder::new(&mut kernel, entry);
        b.br(header);
        b.position_at_end(header);
        let i = b.phi(Type::I32, &[(Value::Const(0), entry)], "i");
        let i = i.as_inst().unwrap();
        assert_eq!(kernel[i].incoming(), vec![(entry, Value::Const(0))]);
    }
}

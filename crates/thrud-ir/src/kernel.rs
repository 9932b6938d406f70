//! Kernels, basic blocks, and in-place graph mutation.
//!
//! A [`Kernel`] owns two arenas: one for basic blocks and one for
//! instructions. Block order is kept separately in a layout vector and each
//! block keeps an ordered list of instruction handles. Every mutator keeps
//! the per-instruction user lists consistent, so passes can ask "who uses
//! this value" without rescanning the kernel.

use std::ops::Index;

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::instr::{Instruction, Opcode, Value};
use crate::types::Type;

/// A basic block: a named, ordered list of instructions ending in a terminator.
#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub(crate) instructions: Vec<Handle<Instruction>>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    /// Instructions in program order.
    pub fn instructions(&self) -> &[Handle<Instruction>] {
        &self.instructions
    }
}

/// A kernel parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// The pointer is known not to alias any other parameter.
    pub noalias: bool,
}

/// A GPU compute kernel in SSA form.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub name: String,
    pub params: Vec<Param>,
    blocks: Arena<Block>,
    layout: Vec<Handle<Block>>,
    instructions: Arena<Instruction>,
    /// Users of each instruction, indexed by handle; one entry per use.
    users: Vec<Vec<Handle<Instruction>>>,
}

impl Kernel {
    /// Creates an empty kernel with no parameters or blocks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            blocks: Arena::new(),
            layout: Vec::new(),
            instructions: Arena::new(),
            users: Vec::new(),
        }
    }

    /// Appends a parameter and returns the value referring to it.
    pub fn add_param(&mut self, name: impl Into<String>, ty: Type) -> Value {
        // Safety: kernels never carry anywhere near u32::MAX parameters.
        let index = self.params.len() as u32;
        self.params.push(Param {
            name: name.into(),
            ty,
            noalias: false,
        });
        Value::Param(index)
    }

    /// Appends an empty block at the end of the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> Handle<Block> {
        let handle = self.blocks.append(Block::new(name));
        self.layout.push(handle);
        handle
    }

    /// Inserts an empty block at `position` in the layout (0 makes it the entry).
    pub fn insert_block_at(&mut self, position: usize, name: impl Into<String>) -> Handle<Block> {
        let handle = self.blocks.append(Block::new(name));
        let position = position.min(self.layout.len());
        self.layout.insert(position, handle);
        handle
    }

    /// Inserts an empty block right after `anchor` in the layout.
    pub fn insert_block_after(
        &mut self,
        anchor: Handle<Block>,
        name: impl Into<String>,
    ) -> Result<Handle<Block>, IrError> {
        let position = self
            .layout
            .iter()
            .position(|&b| b == anchor)
            .ok_or(IrError::BadHandle {
                index: anchor.index(),
                size: self.blocks.len(),
            })?;
        Ok(self.insert_block_at(position + 1, name))
    }

    /// The entry block (first in layout).
    pub fn entry(&self) -> Option<Handle<Block>> {
        self.layout.first().copied()
    }

    /// Blocks in layout order.
    pub fn layout(&self) -> &[Handle<Block>] {
        &self.layout
    }

    pub fn block(&self, handle: Handle<Block>) -> &Block {
        &self.blocks[handle]
    }

    pub fn block_mut(&mut self, handle: Handle<Block>) -> &mut Block {
        &mut self.blocks[handle]
    }

    /// Looks up a block by name.
    pub fn find_block(&self, name: &str) -> Option<Handle<Block>> {
        self.layout
            .iter()
            .copied()
            .find(|&b| self.blocks[b].name == name)
    }

    pub fn inst(&self, handle: Handle<Instruction>) -> &Instruction {
        &self.instructions[handle]
    }

    /// Mutable access to an instruction's opcode, type, and name.
    ///
    /// Operands are only reachable through [`Kernel::set_operand`] so that
    /// user lists stay consistent.
    pub fn inst_mut(&mut self, handle: Handle<Instruction>) -> &mut Instruction {
        &mut self.instructions[handle]
    }

    /// Returns `true` if the handle names an instruction of this kernel.
    pub fn contains(&self, handle: Handle<Instruction>) -> bool {
        self.instructions.contains(handle)
    }

    /// Returns `true` if the instruction is still placed in a block.
    pub fn is_live(&self, handle: Handle<Instruction>) -> bool {
        self.instructions
            .try_get(handle)
            .is_some_and(|inst| inst.parent.is_some())
    }

    /// Looks up a live instruction by value name.
    pub fn find(&self, name: &str) -> Option<Handle<Instruction>> {
        self.instructions()
            .into_iter()
            .find(|&h| self.instructions[h].name.as_deref() == Some(name))
    }

    /// Live instructions in layout order.
    pub fn instructions(&self) -> Vec<Handle<Instruction>> {
        self.layout
            .iter()
            .flat_map(|&b| self.blocks[b].instructions.iter().copied())
            .collect()
    }

    /// Number of instructions ever allocated, including erased ones.
    pub fn instruction_capacity(&self) -> usize {
        self.instructions.len()
    }

    /// The terminator of a block, if it has one.
    pub fn terminator(&self, block: Handle<Block>) -> Option<Handle<Instruction>> {
        self.blocks[block]
            .instructions
            .last()
            .copied()
            .filter(|&h| self.instructions[h].is_terminator())
    }

    /// Successor blocks in branch order.
    pub fn successors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.terminator(block)
            .map(|t| self.instructions[t].successors())
            .unwrap_or_default()
    }

    /// Predecessor blocks in layout order.
    pub fn predecessors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.layout
            .iter()
            .copied()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// Type of an operand. Globals and `undef` have no kernel-local type; use
    /// [`crate::Module::value_type`] to resolve globals.
    pub fn value_type(&self, value: Value) -> Type {
        match value {
            Value::Inst(h) => self.instructions[h].ty,
            Value::Param(i) => self
                .params
                .get(i as usize)
                .map_or(Type::Void, |param| param.ty),
            Value::Const(_) => Type::I32,
            Value::Global(_) | Value::Undef => Type::Void,
        }
    }

    /// Block and index of a live instruction.
    pub fn position(&self, handle: Handle<Instruction>) -> Option<(Handle<Block>, usize)> {
        let block = self.instructions.try_get(handle)?.parent?;
        let index = self.blocks[block]
            .instructions
            .iter()
            .position(|&h| h == handle)?;
        Some((block, index))
    }

    /// Copies an instruction's payload into a detached instruction.
    pub fn clone_instruction(&self, handle: Handle<Instruction>) -> Instruction {
        let mut copy = self.instructions[handle].clone();
        copy.parent = None;
        copy
    }

    /// Appends an instruction at the end of `block`.
    pub fn append(&mut self, block: Handle<Block>, inst: Instruction) -> Handle<Instruction> {
        let len = self.blocks[block].instructions.len();
        self.place(block, len, inst)
    }

    /// Inserts an instruction immediately after `anchor`.
    pub fn insert_after(
        &mut self,
        anchor: Handle<Instruction>,
        inst: Instruction,
    ) -> Result<Handle<Instruction>, IrError> {
        let (block, index) = self.position(anchor).ok_or(IrError::Detached(anchor))?;
        Ok(self.place(block, index + 1, inst))
    }

    /// Inserts an instruction immediately before `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: Handle<Instruction>,
        inst: Instruction,
    ) -> Result<Handle<Instruction>, IrError> {
        let (block, index) = self.position(anchor).ok_or(IrError::Detached(anchor))?;
        Ok(self.place(block, index, inst))
    }

    /// Inserts at the first non-phi position of `block`.
    pub fn insert_after_phis(&mut self, block: Handle<Block>, inst: Instruction) -> Handle<Instruction> {
        let index = self.blocks[block]
            .instructions
            .iter()
            .take_while(|&&h| self.instructions[h].is_phi())
            .count();
        self.place(block, index, inst)
    }

    fn place(&mut self, block: Handle<Block>, index: usize, mut inst: Instruction) -> Handle<Instruction> {
        inst.parent = Some(block);
        let operands = inst.operands.clone();
        let handle = self.instructions.append(inst);
        self.users.push(Vec::new());
        for operand in operands {
            self.add_use(operand, handle);
        }
        self.blocks[block].instructions.insert(index, handle);
        handle
    }

    fn add_use(&mut self, operand: Value, user: Handle<Instruction>) {
        if let Value::Inst(def) = operand {
            if let Some(list) = self.users.get_mut(def.index()) {
                list.push(user);
            }
        }
    }

    fn remove_use(&mut self, operand: Value, user: Handle<Instruction>) {
        if let Value::Inst(def) = operand {
            if let Some(list) = self.users.get_mut(def.index()) {
                if let Some(pos) = list.iter().position(|&u| u == user) {
                    list.swap_remove(pos);
                }
            }
        }
    }

    /// Distinct users of an instruction, in allocation order.
    pub fn users(&self, handle: Handle<Instruction>) -> Vec<Handle<Instruction>> {
        let mut users = self.users.get(handle.index()).cloned().unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    pub fn has_users(&self, handle: Handle<Instruction>) -> bool {
        self.users
            .get(handle.index())
            .is_some_and(|list| !list.is_empty())
    }

    /// Replaces operand `index` of `inst`.
    pub fn set_operand(
        &mut self,
        inst: Handle<Instruction>,
        index: usize,
        value: Value,
    ) -> Result<(), IrError> {
        let old = self.instructions[inst]
            .operands
            .get(index)
            .copied()
            .ok_or(IrError::BadOperand { inst, index })?;
        self.remove_use(old, inst);
        self.instructions[inst].operands[index] = value;
        self.add_use(value, inst);
        Ok(())
    }

    /// Adds an incoming `(value, block)` pair to a phi.
    pub fn add_incoming(
        &mut self,
        phi: Handle<Instruction>,
        value: Value,
        block: Handle<Block>,
    ) -> Result<(), IrError> {
        match &mut self.instructions[phi].opcode {
            Opcode::Phi { incoming } => incoming.push(block),
            _ => return Err(IrError::NotPhi(phi)),
        }
        self.instructions[phi].operands.push(value);
        self.add_use(value, phi);
        Ok(())
    }

    /// Redirects every use of `old` to `new`. Returns the number of rewritten operands.
    pub fn replace_all_uses_with(&mut self, old: Handle<Instruction>, new: Value) -> usize {
        self.replace_uses_except(old, new, &[])
    }

    /// Redirects every use of `old` to `new`, except uses by the instructions in `keep`.
    pub fn replace_uses_except(
        &mut self,
        old: Handle<Instruction>,
        new: Value,
        keep: &[Handle<Instruction>],
    ) -> usize {
        let mut rewritten = 0;
        for user in self.users(old) {
            if keep.contains(&user) {
                continue;
            }
            // Safety of the index loop: operand count never changes here.
            for index in 0..self.instructions[user].operands.len() {
                if self.instructions[user].operands[index] == Value::Inst(old) {
                    self.instructions[user].operands[index] = new;
                    self.remove_use(Value::Inst(old), user);
                    self.add_use(new, user);
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    /// Removes an unused instruction from its block.
    pub fn erase(&mut self, handle: Handle<Instruction>) -> Result<(), IrError> {
        let (block, index) = self.position(handle).ok_or(IrError::Detached(handle))?;
        if self.has_users(handle) {
            return Err(IrError::HasUsers(handle));
        }
        self.blocks[block].instructions.remove(index);
        let operands = std::mem::take(&mut self.instructions[handle].operands);
        for operand in &operands {
            self.remove_use(*operand, handle);
        }
        let inst = &mut self.instructions[handle];
        inst.operands = operands;
        inst.parent = None;
        Ok(())
    }
}

impl Index<Handle<Instruction>> for Kernel {
    type Output = Instruction;

    fn index(&self, handle: Handle<Instruction>) -> &Instruction {
        &self.instructions[handle]
    }
}

impl Index<Handle<Block>> for Kernel {
    type Output = Block;

    fn index(&self, handle: Handle<Block>) -> &Block {
        &self.blocks[handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::BinaryOp;

    fn add(lhs: Value, rhs: Value) -> Instruction {
        Instruction::new(Opcode::Binary(BinaryOp::Add), Type::I32, vec![lhs, rhs])
    }

    #[test]
    fn append_tracks_users() {
        let mut k = Kernel::new("k");
        let n = k.add_param("n", Type::I32);
        let entry = k.add_block("entry");
        let a = k.append(entry, add(n, Value::Const(1)));
        let b = k.append(entry, add(Value::Inst(a), Value::Inst(a)));
        assert_eq!(k.users(a), vec![b]);
        assert!(!k.has_users(b));
        assert_eq!(k.instructions(), vec![a, b]);
    }

    #[test]
    fn insert_after_keeps_order() {
        let mut k = Kernel::new("k");
        let entry = k.add_block("entry");
        let a = k.append(entry, add(Value::Const(1), Value::Const(2)));
        let c = k.append(entry, add(Value::Inst(a), Value::Const(3)));
        let b = k.insert_after(a, add(Value::Inst(a), Value::Const(4))).unwrap();
        assert_eq!(k.block(entry).instructions(), &[a, b, c]);
        assert_eq!(k.position(b), Some((entry, 1)));
    }

    #[test]
    fn replace_uses_except_skips_kept_users() {
        let mut k = Kernel::new("k");
        let entry = k.add_block("entry");
        let a = k.append(entry, add(Value::Const(1), Value::Const(2)));
        let scaled = k.append(entry, add(Value::Inst(a), Value::Const(0)));
        let user = k.append(entry, add(Value::Inst(a), Value::Inst(a)));
        let n = k.replace_uses_except(a, Value::Inst(scaled), &[scaled]);
        assert_eq!(n, 2);
        assert_eq!(k[user].operands(), &[Value::Inst(scaled), Value::Inst(scaled)]);
        assert_eq!(k.users(a), vec![scaled]);
        assert_eq!(k.users(scaled), vec![user]);
    }

    #[test]
    fn erase_requires_no_users() {
        let mut k = Kernel::new("k");
        let entry = k.add_block("entry");
        let a = k.append(entry, add(Value::Const(1), Value::Const(2)));
        let b = k.append(entry, add(Value::Inst(a), Value::Const(3)));
        assert!(matches!(k.erase(a), Err(IrError::HasUsers(_))));
        k.erase(b).unwrap();
        assert!(!k.is_live(b));
        assert!(!k.has_users(a));
        k.erase(a).unwrap();
        assert!(k.instructions().is_empty());
        assert!(matches!(k.erase(a), Err(IrError::Detached(_))));
    }

    #[test]
    fn cfg_edges() {
        let mut k = Kernel::new("k");
        let entry = k.add_block("entry");
        let body = k.add_block("body");
        let exit = k.add_block("exit");
        k.append(
            entry,
            Instruction::new(
                Opcode::CondBr {
                    accept: body,
                    reject: exit,
                },
                Type::Void,
                vec![Value::Const(1)],
            ),
        );
        k.append(body, Instruction::new(Opcode::Br { target: exit }, Type::Void, vec![]));
        k.append(exit, Instruction::new(Opcode::Ret, Type::Void, vec![]));
        assert_eq!(k.successors(entry), vec![body, exit]);
        assert_eq!(k.predecessors(exit), vec![entry, body]);
        assert_eq!(k.find_block("body"), Some(body));

        let head = k.insert_block_at(0, "pre");
        assert_eq!(k.entry(), Some(head));
    }
}

//! Error types for the thrud IR.

use crate::arena::Handle;
use crate::instr::Instruction;

/// Errors raised by IR construction and in-place mutation.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// The instruction is not placed in any block.
    #[error("instruction {0:?} is not placed in a block")]
    Detached(Handle<Instruction>),

    /// The instruction still has users and cannot be erased.
    #[error("instruction {0:?} still has users")]
    HasUsers(Handle<Instruction>),

    /// An operand index is out of range for the instruction.
    #[error("instruction {inst:?} has no operand #{index}")]
    BadOperand {
        inst: Handle<Instruction>,
        index: usize,
    },

    /// The instruction is not a phi.
    #[error("instruction {0:?} is not a phi")]
    NotPhi(Handle<Instruction>),

    /// No kernel with the given name exists in the module.
    #[error("no kernel named '{0}'")]
    UnknownKernel(String),
}

//! Instructions and SSA values.

use crate::arena::Handle;
use crate::global::GlobalVariable;
use crate::kernel::Block;
use crate::types::Type;

/// An SSA operand.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Value {
    /// The result of an instruction.
    Inst(Handle<Instruction>),
    /// A kernel parameter by position.
    Param(u32),
    /// The address of a module-scope variable.
    Global(Handle<GlobalVariable>),
    /// An integer literal.
    Const(i64),
    /// An undefined value.
    Undef,
}

impl Value {
    /// Returns the defining instruction, if any.
    pub fn as_inst(self) -> Option<Handle<Instruction>> {
        match self {
            Self::Inst(handle) => Some(handle),
            _ => None,
        }
    }

    /// Returns the literal value, if any.
    pub fn as_const(self) -> Option<i64> {
        match self {
            Self::Const(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Handle<Instruction>> for Value {
    fn from(handle: Handle<Instruction>) -> Self {
        Self::Inst(handle)
    }
}

/// Integer binary operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub const ALL: [Self; 13] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::UDiv,
        Self::SDiv,
        Self::URem,
        Self::SRem,
        Self::Shl,
        Self::LShr,
        Self::AShr,
        Self::And,
        Self::Or,
        Self::Xor,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::UDiv => "udiv",
            Self::SDiv => "sdiv",
            Self::URem => "urem",
            Self::SRem => "srem",
            Self::Shl => "shl",
            Self::LShr => "lshr",
            Self::AShr => "ashr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.keyword() == word)
    }
}

/// Integer comparison predicates.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl CmpPredicate {
    pub const ALL: [Self; 10] = [
        Self::Eq,
        Self::Ne,
        Self::Ugt,
        Self::Uge,
        Self::Ult,
        Self::Ule,
        Self::Sgt,
        Self::Sge,
        Self::Slt,
        Self::Sle,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
            Self::Slt => "slt",
            Self::Sle => "sle",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.keyword() == word)
    }
}

/// Value-preserving conversions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    /// No-op reinterpretation (pointer or same-width integer).
    BitCast,
}

impl CastOp {
    pub const ALL: [Self; 4] = [Self::Trunc, Self::ZExt, Self::SExt, Self::BitCast];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Trunc => "trunc",
            Self::ZExt => "zext",
            Self::SExt => "sext",
            Self::BitCast => "bitcast",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.keyword() == word)
    }
}

/// The closed set of operations a kernel instruction can perform.
///
/// Operand layout per opcode:
/// - `Binary`, `ICmp`: `[lhs, rhs]`
/// - `Select`: `[condition, accept, reject]`
/// - `Cast`: `[value]`
/// - `Phi`: one value per entry of `incoming`
/// - `Load`: `[pointer]`
/// - `Store`: `[value, pointer]`
/// - `GetElementPtr`: `[base, index]`
/// - `Call`: arguments
/// - `CondBr`: `[condition]`
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Opcode {
    Binary(BinaryOp),
    ICmp(CmpPredicate),
    Select,
    Cast(CastOp),
    Phi {
        incoming: Vec<Handle<Block>>,
    },
    Load {
        align: u32,
    },
    Store {
        align: u32,
        volatile: bool,
    },
    GetElementPtr,
    Call {
        callee: String,
    },
    Br {
        target: Handle<Block>,
    },
    CondBr {
        accept: Handle<Block>,
        reject: Handle<Block>,
    },
    Ret,
    /// An operation outside the modeled set, kept by its mnemonic.
    Other(String),
}

impl Opcode {
    /// Text-format mnemonic.
    pub fn mnemonic(&self) -> &str {
        match self {
            Self::Binary(op) => op.keyword(),
            Self::ICmp(_) => "icmp",
            Self::Select => "select",
            Self::Cast(op) => op.keyword(),
            Self::Phi { .. } => "phi",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::GetElementPtr => "gep",
            Self::Call { .. } => "call",
            Self::Br { .. } => "br",
            Self::CondBr { .. } => "condbr",
            Self::Ret => "ret",
            Self::Other(raw) => raw,
        }
    }
}

/// A single SSA instruction.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Result type (`Void` for instructions without a result).
    pub ty: Type,
    /// Optional value name used by the text format.
    pub name: Option<String>,
    pub(crate) operands: Vec<Value>,
    pub(crate) parent: Option<Handle<Block>>,
}

impl Instruction {
    /// Creates a detached instruction.
    pub fn new(opcode: Opcode, ty: Type, operands: Vec<Value>) -> Self {
        Self {
            opcode,
            ty,
            name: None,
            operands,
            parent: None,
        }
    }

    /// Sets the value name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<Value> {
        self.operands.get(index).copied()
    }

    /// The block this instruction is placed in, or `None` once erased.
    pub fn parent(&self) -> Option<Handle<Block>> {
        self.parent
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Br { .. } | Opcode::CondBr { .. } | Opcode::Ret
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi { .. })
    }

    pub fn is_memory_access(&self) -> bool {
        matches!(self.opcode, Opcode::Load { .. } | Opcode::Store { .. })
    }

    /// Name of the called function for `Call`.
    pub fn callee(&self) -> Option<&str> {
        match &self.opcode {
            Opcode::Call { callee } => Some(callee),
            _ => None,
        }
    }

    /// The address operand of a load, store, or address-index step.
    pub fn pointer_operand(&self) -> Option<Value> {
        match self.opcode {
            Opcode::Load { .. } | Opcode::GetElementPtr => self.operand(0),
            Opcode::Store { .. } => self.operand(1),
            _ => None,
        }
    }

    /// Memory alignment of a load or store in bytes.
    pub fn alignment(&self) -> Option<u32> {
        match self.opcode {
            Opcode::Load { align } | Opcode::Store { align, .. } => Some(align),
            _ => None,
        }
    }

    /// Successor blocks of a terminator.
    pub fn successors(&self) -> Vec<Handle<Block>> {
        match self.opcode {
            Opcode::Br { target } => vec![target],
            Opcode::CondBr { accept, reject } if accept == reject => vec![accept],
            Opcode::CondBr { accept, reject } => vec![accept, reject],
            _ => Vec::new(),
        }
    }

    /// `(incoming block, value)` pairs of a phi.
    pub fn incoming(&self) -> Vec<(Handle<Block>, Value)> {
        match &self.opcode {
            Opcode::Phi { incoming } => incoming
                .iter()
                .copied()
                .zip(self.operands.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Value flowing into a phi from `block`.
    pub fn incoming_value_for(&self, block: Handle<Block>) -> Option<Value> {
        self.incoming()
            .into_iter()
            .find(|(from, _)| *from == block)
            .map(|(_, value)| value)
    }

    /// Rewrites every block reference `from` into `to` (branch targets and
    /// phi incoming blocks). Returns `true` if anything changed.
    pub fn retarget(&mut self, from: Handle<Block>, to: Handle<Block>) -> bool {
        let mut changed = false;
        let mut swap = |slot: &mut Handle<Block>| {
            if *slot == from {
                *slot = to;
                changed = true;
            }
        };
        match &mut self.opcode {
            Opcode::Br { target } => swap(target),
            Opcode::CondBr { accept, reject } => {
                swap(accept);
                swap(reject);
            }
            Opcode::Phi { incoming } => incoming.iter_mut().for_each(swap),
            _ => {}
        }
        changed
    }
}

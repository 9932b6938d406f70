//! Text dump of modules and kernels.
//!
//! The format is line oriented and is read back by `thrud-parser`.

use std::fmt::{self, Write as _};

use crate::Module;
use crate::arena::{Arena, Handle};
use crate::global::GlobalVariable;
use crate::instr::{Instruction, Opcode, Value};
use crate::kernel::{Block, Kernel};
use crate::types::Type;

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Float(bits) => write!(f, "f{bits}"),
            Self::Ptr(space) => write!(f, "ptr {}", space.keyword()),
        }
    }
}

impl fmt::Display for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} = ", self.name)?;
        if self.constant {
            write!(f, "constant ")?;
        }
        write!(f, "{} [{} x {}]", self.space.keyword(), self.count, self.elem)
    }
}

/// Displays a kernel with global names resolved against a module.
pub struct KernelDisplay<'a> {
    globals: &'a Arena<GlobalVariable>,
    kernel: &'a Kernel,
}

impl<'a> KernelDisplay<'a> {
    pub fn new(globals: &'a Arena<GlobalVariable>, kernel: &'a Kernel) -> Self {
        Self { globals, kernel }
    }

    fn value(&self, value: Value) -> String {
        match value {
            Value::Inst(h) => format!("%{}", value_name(self.kernel, h)),
            Value::Param(i) => match self.kernel.params.get(i as usize) {
                Some(param) => format!("%{}", param.name),
                None => format!("%arg{i}"),
            },
            Value::Global(g) => match self.globals.try_get(g) {
                Some(gv) => format!("@{}", gv.name),
                None => format!("@g{}", g.index()),
            },
            Value::Const(c) => c.to_string(),
            Value::Undef => "undef".to_string(),
        }
    }

    fn operand_type(&self, value: Option<Value>) -> Type {
        match value {
            Some(Value::Global(g)) => self
                .globals
                .try_get(g)
                .map_or(Type::Void, |gv| Type::Ptr(gv.space)),
            Some(value) => self.kernel.value_type(value),
            None => Type::Void,
        }
    }

    fn block(&self, block: Handle<Block>) -> String {
        format!("%{}", block_name(self.kernel, block))
    }

    fn operand_list(&self, inst: &Instruction) -> String {
        inst.operands()
            .iter()
            .map(|&v| self.value(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn instruction(&self, handle: Handle<Instruction>) -> String {
        let inst = &self.kernel[handle];
        let mut line = String::new();
        if inst.ty != Type::Void {
            let _ = write!(line, "%{} = ", value_name(self.kernel, handle));
        }
        let op = |i: usize| inst.operand(i).map_or_else(|| "undef".to_string(), |v| self.value(v));
        let _ = match &inst.opcode {
            Opcode::Binary(bin) => write!(line, "{} {} {}, {}", bin.keyword(), inst.ty, op(0), op(1)),
            Opcode::ICmp(pred) => {
                let ty = self.operand_type(inst.operand(0));
                write!(line, "icmp {} {} {}, {}", pred.keyword(), ty, op(0), op(1))
            }
            Opcode::Select => write!(line, "select {} {}, {}, {}", inst.ty, op(0), op(1), op(2)),
            Opcode::Cast(cast) => write!(line, "{} {} {}", cast.keyword(), inst.ty, op(0)),
            Opcode::Phi { incoming } => {
                let pairs = incoming
                    .iter()
                    .zip(inst.operands())
                    .map(|(&b, &v)| format!("[{}, {}]", self.value(v), self.block(b)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(line, "phi {} {}", inst.ty, pairs)
            }
            Opcode::Load { align } => write!(line, "load {}, {}, align {}", inst.ty, op(0), align),
            Opcode::Store { align, volatile } => {
                let volatile = if *volatile { "volatile " } else { "" };
                let ty = self.operand_type(inst.operand(0));
                write!(line, "store {}{} {}, {}, align {}", volatile, ty, op(0), op(1), align)
            }
            Opcode::GetElementPtr => write!(line, "gep {} {}, {}", inst.ty, op(0), op(1)),
            Opcode::Call { callee } => {
                write!(line, "call {} @{}({})", inst.ty, callee, self.operand_list(inst))
            }
            Opcode::Br { target } => write!(line, "br {}", self.block(*target)),
            Opcode::CondBr { accept, reject } => {
                write!(line, "condbr {}, {}, {}", op(0), self.block(*accept), self.block(*reject))
            }
            Opcode::Ret if inst.operands().is_empty() => write!(line, "ret"),
            Opcode::Ret => write!(line, "ret {}", op(0)),
            Opcode::Other(raw) if inst.operands().is_empty() => write!(line, "{} {}", raw, inst.ty),
            Opcode::Other(raw) => write!(line, "{} {} {}", raw, inst.ty, self.operand_list(inst)),
        };
        line
    }
}

impl fmt::Display for KernelDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .kernel
            .params
            .iter()
            .map(|p| {
                let noalias = if p.noalias { "noalias " } else { "" };
                format!("{} {}%{}", p.ty, noalias, p.name)
            })
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "kernel @{}({}) {{", self.kernel.name, params)?;
        for &block in self.kernel.layout() {
            writeln!(f, "{}:", block_name(self.kernel, block))?;
            for &inst in self.kernel[block].instructions() {
                writeln!(f, "  {}", self.instruction(inst))?;
            }
        }
        write!(f, "}}")
    }
}

/// Printed name of an instruction result (without the `%` sigil).
pub fn value_name(kernel: &Kernel, handle: Handle<Instruction>) -> String {
    match &kernel[handle].name {
        Some(name) => name.clone(),
        None => format!("v{}", handle.index()),
    }
}

/// Printed name of a block.
pub fn block_name(kernel: &Kernel, block: Handle<Block>) -> String {
    let name = &kernel[block].name;
    if name.is_empty() {
        format!("bb{}", block.index())
    } else {
        name.clone()
    }
}

/// Dumps a whole module in the text format.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    for (_, gv) in module.globals.iter() {
        let _ = writeln!(out, "{gv}");
    }
    for kernel in &module.kernels {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "{}", KernelDisplay::new(&module.globals, kernel));
    }
    out
}

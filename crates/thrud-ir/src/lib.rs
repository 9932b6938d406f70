//! thrud intermediate representation.
//!
//! An arena-based SSA IR for GPU compute kernels. Instructions and blocks
//! are addressed by stable typed handles, and every kernel keeps explicit
//! user lists so rewrites can redirect uses without rescanning.

pub mod arena;
mod builder;
mod display;
mod error;
mod global;
mod instr;
mod kernel;
mod types;

pub use arena::{Arena, Handle};
pub use builder::KernelBuilder;
pub use display::{KernelDisplay, block_name, dump_module, value_name};
pub use error::IrError;
pub use global::GlobalVariable;
pub use instr::{BinaryOp, CastOp, CmpPredicate, Instruction, Opcode, Value};
pub use kernel::{Block, Kernel, Param};
pub use types::{AddressSpace, Type};

/// A translation unit: module-scope variables and the kernels using them.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Module-scope variables.
    pub globals: Arena<GlobalVariable>,
    /// Compute kernels in source order.
    pub kernels: Vec<Kernel>,
}

impl Module {
    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn kernel_mut(&mut self, name: &str) -> Option<&mut Kernel> {
        self.kernels.iter_mut().find(|k| k.name == name)
    }

    /// Looks up a module-scope variable by name.
    pub fn find_global(&self, name: &str) -> Option<Handle<GlobalVariable>> {
        self.globals
            .iter()
            .find(|(_, gv)| gv.name == name)
            .map(|(handle, _)| handle)
    }

    /// Type of an operand of `kernel`, resolving globals to pointers into
    /// their address space.
    pub fn value_type(&self, kernel: &Kernel, value: Value) -> Type {
        match value {
            Value::Global(g) => self
                .globals
                .try_get(g)
                .map_or(Type::Void, |gv| Type::Ptr(gv.space)),
            other => kernel.value_type(other),
        }
    }

    /// Display adapter for one kernel of this module.
    pub fn display_kernel<'a>(&'a self, kernel: &'a Kernel) -> KernelDisplay<'a> {
        KernelDisplay::new(&self.globals, kernel)
    }
}

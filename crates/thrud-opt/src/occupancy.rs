//! Occupancy reduction.
//!
//! Reserves extra work-group shared memory in a kernel without changing
//! what it computes: a shared byte array is declared and touched by a
//! volatile store behind a guard that never holds at run time, so the
//! compiler must keep the allocation. A larger per-group footprint lowers
//! the number of groups resident on a compute unit.

use thrud_analysis::CoordinateKind;
use thrud_ir::{
    AddressSpace, Block, CmpPredicate, GlobalVariable, Handle, IrError, Kernel, KernelBuilder,
    Module, Type, Value,
};

use crate::{KernelSelection, Pass};

/// Local size the guard compares against; no launch uses it.
const IMPOSSIBLE_LOCAL_SIZE: i64 = i32::MAX as i64;

/// The occupancy reduction pass. A byte count of 0 disables it.
#[derive(Debug)]
pub struct OccupancyReduction {
    selection: KernelSelection,
    shared_bytes: u32,
}

impl OccupancyReduction {
    pub fn new(selection: KernelSelection, shared_bytes: u32) -> Self {
        Self {
            selection,
            shared_bytes,
        }
    }
}

impl Pass for OccupancyReduction {
    fn name(&self) -> &str {
        "ored"
    }

    fn run(&self, module: &mut Module) -> bool {
        if self.shared_bytes == 0 {
            return false;
        }
        let mut changed = false;
        for index in self.selection.indices(module) {
            match reduce_occupancy(module, index, self.shared_bytes) {
                Ok(reserved) => changed |= reserved,
                Err(e) => log::warn!("{}: occupancy not reduced: {e}", module.kernels[index].name),
            }
        }
        changed
    }
}

/// Reserves `shared_bytes` of shared memory in kernel `index`.
///
/// Adds a `local [shared_bytes x i8]` variable named `<kernel>..ored` and a
/// new entry block branching to a volatile store into it when
/// `get_local_size(0)` equals `i32::MAX`, or straight to the old entry.
/// Kernels without blocks are left alone and yield `false`.
pub fn reduce_occupancy(module: &mut Module, index: usize, shared_bytes: u32) -> Result<bool, IrError> {
    let kernel = module
        .kernels
        .get_mut(index)
        .ok_or_else(|| IrError::UnknownKernel(format!("#{index}")))?;
    let Some(old_entry) = kernel.entry() else {
        return Ok(false);
    };
    let global = module.globals.append(GlobalVariable::new(
        format!("{}..ored", kernel.name),
        AddressSpace::Local,
        Type::Int(8),
        shared_bytes,
    ));

    let entry_name = format!("ored..{}", kernel[old_entry].name);
    let access = kernel.insert_block_at(0, "ored..memaccess");
    let entry = kernel.insert_block_at(0, entry_name);
    build_guard(kernel, entry, access, old_entry, global);
    log::debug!("{}: reserved {shared_bytes} bytes of shared memory", kernel.name);
    Ok(true)
}

fn build_guard(
    kernel: &mut Kernel,
    entry: Handle<Block>,
    access: Handle<Block>,
    old_entry: Handle<Block>,
    global: Handle<GlobalVariable>,
) {
    let mut b = KernelBuilder::new(kernel, entry);
    let size = b.coordinate(CoordinateKind::LocalSize.builtin(), 0, "ored..lsz");
    let never = b.icmp(CmpPredicate::Eq, size, Value::Const(IMPOSSIBLE_LOCAL_SIZE), "ored..cmp");
    b.cond_br(never, access, old_entry);

    b.position_at_end(access);
    let ptr = b.gep(
        Type::Ptr(AddressSpace::Local),
        Value::Global(global),
        Value::Const(0),
        "ored..ptr",
    );
    b.store_volatile(Value::Const(0), ptr, 1);
    b.br(old_entry);
}

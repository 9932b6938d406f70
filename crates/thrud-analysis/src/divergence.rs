//! Divergence information consumed by thread coarsening.
//!
//! The coarsening transformer needs to know which instructions compute
//! per-thread values along the coarsening axis (they are replicated per
//! coarsened copy) and which single-entry/single-exit regions are controlled
//! by such values (they are replicated as a unit). Any analysis can supply
//! this through [`DivergenceProvider`]; [`TaintDivergence`] is a basic
//! forward-taint analysis that handles straight-line divergent code and
//! refuses kernels that branch on divergent values.

use std::collections::HashMap;

use indexmap::IndexSet;
use thrud_ir::{Block, Handle, Instruction, Kernel, Module, Value};

use crate::ndrange::NdRange;

/// Granularity at which coarsened copies are distributed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CoarseningMode {
    /// Copies run serially inside one physical thread.
    #[default]
    ThreadLevel,
    /// Copies are whole work groups folded into one group.
    BlockLevel,
}

/// A single-entry, single-exit subgraph controlled by a divergent branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DivergentRegion {
    /// The only block entered from outside the region.
    pub header: Handle<Block>,
    /// The only block leaving the region.
    pub exiting: Handle<Block>,
    /// Every block of the region, header first, in layout order.
    pub blocks: Vec<Handle<Block>>,
}

impl DivergentRegion {
    pub fn contains(&self, block: Handle<Block>) -> bool {
        self.blocks.contains(&block)
    }

    /// The block control reaches after leaving the region.
    pub fn exit(&self, kernel: &Kernel) -> Option<Handle<Block>> {
        kernel
            .successors(self.exiting)
            .into_iter()
            .find(|b| !self.contains(*b))
    }
}

/// Divergence facts for one kernel and coarsening axis.
#[derive(Clone, Debug, Default)]
pub struct DivergenceInfo {
    /// Every instruction whose value varies between coarsened copies.
    pub divergent: IndexSet<Handle<Instruction>>,
    /// Divergent instructions outside every region, in program order.
    pub outermost_instructions: Vec<Handle<Instruction>>,
    /// Regions that must be replicated as a whole.
    pub outermost_regions: Vec<DivergentRegion>,
}

impl DivergenceInfo {
    pub fn is_divergent(&self, inst: Handle<Instruction>) -> bool {
        self.divergent.contains(&inst)
    }

    pub fn is_empty(&self) -> bool {
        self.outermost_instructions.is_empty() && self.outermost_regions.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DivergenceError {
    /// The kernel branches on a divergent value; region information is needed.
    #[error("kernel '{kernel}' branches on a divergent value in block '{block}'")]
    DivergentBranch { kernel: String, block: String },
    /// The provider has nothing for this kernel.
    #[error("no divergence information for kernel '{0}'")]
    Unavailable(String),
}

/// Source of divergence information.
pub trait DivergenceProvider {
    fn divergence(
        &self,
        module: &Module,
        kernel: &Kernel,
        ndr: &NdRange,
        direction: u32,
        mode: CoarseningMode,
    ) -> Result<DivergenceInfo, DivergenceError>;
}

/// Forward taint from the coordinate queries that vary along the axis.
///
/// Seeds are the global and local ids of the axis in thread-level mode. In
/// block-level mode they are the group and global ids of the axis plus every
/// instruction addressing a work-group-local variable, since each folded
/// group needs its own copy of shared memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaintDivergence;

impl DivergenceProvider for TaintDivergence {
    fn divergence(
        &self,
        module: &Module,
        kernel: &Kernel,
        ndr: &NdRange,
        direction: u32,
        mode: CoarseningMode,
    ) -> Result<DivergenceInfo, DivergenceError> {
        let mut seeds: Vec<Handle<Instruction>> = match mode {
            CoarseningMode::ThreadLevel => ndr.divergent_ids(direction),
            CoarseningMode::BlockLevel => {
                let mut seeds = ndr.group_ids(direction).to_vec();
                seeds.extend_from_slice(ndr.global_ids(direction));
                seeds
            }
        };
        if mode == CoarseningMode::BlockLevel {
            seeds.extend(kernel.instructions().into_iter().filter(|&h| {
                kernel[h].operands().iter().any(|op| match op {
                    Value::Global(g) => module.globals.try_get(*g).is_some_and(|gv| gv.is_shared()),
                    _ => false,
                })
            }));
        }

        let mut divergent = IndexSet::new();
        let mut work = seeds;
        while let Some(inst) = work.pop() {
            if !divergent.insert(inst) {
                continue;
            }
            work.extend(kernel.users(inst));
        }

        // Keep program order.
        let order: HashMap<_, _> = kernel
            .instructions()
            .into_iter()
            .enumerate()
            .map(|(i, h)| (h, i))
            .collect();
        divergent.sort_by(|a, b| order.get(a).cmp(&order.get(b)));

        for &inst in &divergent {
            if kernel[inst].is_terminator() {
                let block = kernel[inst]
                    .parent()
                    .map(|b| thrud_ir::block_name(kernel, b))
                    .unwrap_or_default();
                return Err(DivergenceError::DivergentBranch {
                    kernel: kernel.name.clone(),
                    block,
                });
            }
        }

        let outermost_instructions = divergent
            .iter()
            .copied()
            .filter(|&h| !ndr.is_coordinate(h))
            .collect();
        log::debug!(
            "{}: {} divergent instructions along direction {}",
            kernel.name,
            divergent.len(),
            direction
        );
        Ok(DivergenceInfo {
            divergent,
            outermost_instructions,
            outermost_regions: Vec::new(),
        })
    }
}

/// Divergence supplied ahead of time by an external analysis, per kernel name.
#[derive(Clone, Debug, Default)]
pub struct PrecomputedDivergence(pub HashMap<String, DivergenceInfo>);

impl DivergenceProvider for PrecomputedDivergence {
    fn divergence(
        &self,
        _module: &Module,
        kernel: &Kernel,
        _ndr: &NdRange,
        _direction: u32,
        _mode: CoarseningMode,
    ) -> Result<DivergenceInfo, DivergenceError> {
        self.0
            .get(&kernel.name)
            .cloned()
            .ok_or_else(|| DivergenceError::Unavailable(kernel.name.clone()))
    }
}

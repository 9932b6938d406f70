//! Thread coarsening.
//!
//! Folds `factor` logical work items into one along a direction. The
//! index-space queries of that direction are rescaled first, so the id of
//! the folded work item becomes the id of its first logical item, and the
//! ids of the others are generated next to it. Then every outermost
//! divergent instruction is cloned `factor - 1` times and every outermost
//! divergent region is cloned as a unit, with operands remapped to the copy
//! of the same index. Operands whose copy does not exist yet go through a
//! placeholder that is swapped for the real copy at the end.
//!
//! The kernel is rewritten on a scratch copy and committed only when every
//! step succeeded.

mod placeholder;
mod region;
mod scaling;

use std::fmt::Debug;

use indexmap::{IndexMap, IndexSet};
use thrud_analysis::{
    CoarseningMode, DIRECTIONS, DivergenceError, DivergenceInfo, DivergenceProvider, NdRange,
    TaintDivergence,
};
use thrud_ir::{Arena, GlobalVariable, Handle, Instruction, IrError, Kernel, Module, Value};

use crate::replace_ids::replace_global_ids;
use crate::{KernelSelection, Pass};

use placeholder::Placeholders;

/// How a kernel is coarsened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoarseningOptions {
    /// Logical work items folded into one; 1 disables coarsening.
    pub factor: u32,
    /// Index-space direction to fold along.
    pub direction: u32,
    pub mode: CoarseningMode,
    /// Distance between the logical ids handled by one work item
    /// (thread-level only).
    pub stride: u32,
}

impl Default for CoarseningOptions {
    fn default() -> Self {
        Self {
            factor: 1,
            direction: 0,
            mode: CoarseningMode::ThreadLevel,
            stride: 1,
        }
    }
}

impl CoarseningOptions {
    pub fn validate(&self) -> Result<(), CoarseningError> {
        if self.factor == 0 {
            return Err(CoarseningError::InvalidFactor(self.factor));
        }
        if self.direction as usize >= DIRECTIONS {
            return Err(CoarseningError::InvalidDirection(self.direction));
        }
        if self.stride == 0 {
            return Err(CoarseningError::InvalidStride(self.stride));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoarseningError {
    #[error("coarsening factor must be at least 1, got {0}")]
    InvalidFactor(u32),

    #[error("coarsening direction must be 0, 1 or 2, got {0}")]
    InvalidDirection(u32),

    #[error("coarsening stride must be at least 1, got {0}")]
    InvalidStride(u32),

    #[error("module has no kernel #{0}")]
    NoKernel(usize),

    #[error(transparent)]
    Divergence(#[from] DivergenceError),

    #[error(transparent)]
    Ir(#[from] IrError),
}

/// What one coarsening run produced.
#[derive(Clone, Debug, Default)]
pub struct Coarsening {
    /// The `factor - 1` clones of every replicated instruction, in copy order.
    pub clones: IndexMap<Handle<Instruction>, Vec<Handle<Instruction>>>,
    /// Generated ids of the other folded work items, keyed by the rescaled
    /// base id.
    pub id_copies: IndexMap<Handle<Instruction>, Vec<Handle<Instruction>>>,
    /// Copies of work-group shared variables (block-level only).
    pub shared_copies: IndexMap<Handle<GlobalVariable>, Vec<Handle<GlobalVariable>>>,
    /// Multiplications inserted after rescaled size queries.
    pub scaled_sizes: Vec<Handle<Instruction>>,
    /// Placeholders left without a real copy.
    pub unresolved: usize,
}

impl Coarsening {
    /// Returns `true` if the run did not touch the kernel.
    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
            && self.id_copies.is_empty()
            && self.shared_copies.is_empty()
            && self.scaled_sizes.is_empty()
    }
}

/// Coarsens kernel `index` of `module`.
///
/// In block-level mode the global ids of the direction are first decomposed
/// into group, local size and local id queries (see [`replace_global_ids`]),
/// so that rescaling the group id moves them too. Divergence is computed on
/// the decomposed kernel.
///
/// On error the module is left exactly as it was.
pub fn coarsen(
    module: &mut Module,
    index: usize,
    options: &CoarseningOptions,
    provider: &dyn DivergenceProvider,
) -> Result<Coarsening, CoarseningError> {
    options.validate()?;
    let kernel = module
        .kernels
        .get(index)
        .ok_or(CoarseningError::NoKernel(index))?;
    if options.factor == 1 {
        log::debug!("{}: factor 1, nothing to coarsen", kernel.name);
        return Ok(Coarsening::default());
    }

    let mut work = kernel.clone();
    if options.mode == CoarseningMode::BlockLevel {
        let decomposed = replace_global_ids(&mut work, options.direction)?;
        if decomposed > 0 {
            log::debug!("{}: decomposed {decomposed} global ids", work.name);
        }
    }
    let ndr = NdRange::analyze(&work);
    let info = provider.divergence(module, &work, &ndr, options.direction, options.mode)?;

    let mut globals = module.globals.clone();
    let result = Coarsener {
        kernel: &mut work,
        globals: &mut globals,
        ndr: &ndr,
        info: &info,
        options,
        result: Coarsening::default(),
        placeholders: Placeholders::default(),
    }
    .run()?;

    log::debug!(
        "{}: {} instructions replicated {} times along direction {}",
        work.name,
        result.clones.len(),
        options.factor - 1,
        options.direction
    );
    module.kernels[index] = work;
    module.globals = globals;
    Ok(result)
}

/// Name of copy `index` (0-based) of a value or block.
fn copy_name(name: &str, index: usize) -> String {
    format!("{name}..cf{}", index + 2)
}

struct Coarsener<'a> {
    kernel: &'a mut Kernel,
    globals: &'a mut Arena<GlobalVariable>,
    ndr: &'a NdRange,
    info: &'a DivergenceInfo,
    options: &'a CoarseningOptions,
    result: Coarsening,
    placeholders: Placeholders,
}

impl Coarsener<'_> {
    fn copies(&self) -> usize {
        self.options.factor as usize - 1
    }

    fn run(mut self) -> Result<Coarsening, IrError> {
        if self.options.mode == CoarseningMode::BlockLevel {
            self.replicate_shared();
        }
        self.scale_ndrange()?;

        let info = self.info;
        for &inst in &info.outermost_instructions {
            self.replicate_instruction(inst)?;
        }
        for region in &info.outermost_regions {
            self.replicate_region(region)?;
        }

        let placeholders = std::mem::take(&mut self.placeholders);
        log::debug!("{}: resolving {} placeholders", self.kernel.name, placeholders.len());
        self.result.unresolved = placeholders.resolve(self.kernel, &self.result.clones)?;
        Ok(self.result)
    }

    /// Gives every folded work group its own copy of each shared variable.
    fn replicate_shared(&mut self) {
        let mut shared = IndexSet::new();
        for h in self.kernel.instructions() {
            for op in self.kernel[h].operands() {
                if let Value::Global(g) = *op {
                    if self.globals.try_get(g).is_some_and(|gv| gv.is_shared()) {
                        shared.insert(g);
                    }
                }
            }
        }
        for g in shared {
            let original = self.globals[g].clone();
            let copies = (0..self.copies())
                .map(|index| {
                    self.globals.append(GlobalVariable {
                        name: copy_name(&original.name, index),
                        ..original.clone()
                    })
                })
                .collect();
            log::debug!("{}: replicating shared '{}'", self.kernel.name, original.name);
            self.result.shared_copies.insert(g, copies);
        }
    }

    /// Clones `inst` once per extra copy, each right after the previous one.
    fn replicate_instruction(&mut self, inst: Handle<Instruction>) -> Result<(), IrError> {
        let mut anchor = inst;
        for index in 0..self.copies() {
            let mut copy = self.kernel.clone_instruction(inst);
            copy.name = copy.name.map(|name| copy_name(&name, index));
            let clone = self.kernel.insert_after(anchor, copy)?;
            self.result.clones.entry(inst).or_default().push(clone);
            self.remap(clone, index)?;
            anchor = clone;
        }
        Ok(())
    }

    /// Points every operand of `clone` at the copy with the same index.
    fn remap(&mut self, clone: Handle<Instruction>, index: usize) -> Result<(), IrError> {
        let operands = self.kernel[clone].operands().to_vec();
        for (slot, operand) in operands.into_iter().enumerate() {
            let copy = self.copy_of(operand, index)?;
            if copy != operand {
                self.kernel.set_operand(clone, slot, copy)?;
            }
        }
        Ok(())
    }

    fn copy_of(&mut self, value: Value, index: usize) -> Result<Value, IrError> {
        let copy = match value {
            Value::Inst(h) => {
                if let Some(&c) = self.result.clones.get(&h).and_then(|c| c.get(index)) {
                    Value::Inst(c)
                } else if let Some(&c) = self.result.id_copies.get(&h).and_then(|c| c.get(index)) {
                    Value::Inst(c)
                } else if self.info.is_divergent(h) && !self.ndr.is_coordinate(h) {
                    Value::Inst(self.placeholders.get_or_insert(self.kernel, h, index)?)
                } else {
                    value
                }
            }
            Value::Global(g) => self
                .result
                .shared_copies
                .get(&g)
                .and_then(|c| c.get(index))
                .map_or(value, |&c| Value::Global(c)),
            other => other,
        };
        Ok(copy)
    }
}

/// The coarsening pass.
///
/// Kernels the divergence provider cannot describe are skipped with a
/// warning and left unmodified.
#[derive(Debug)]
pub struct ThreadCoarsening<P = TaintDivergence> {
    selection: KernelSelection,
    options: CoarseningOptions,
    provider: P,
}

impl ThreadCoarsening {
    pub fn new(selection: KernelSelection, options: CoarseningOptions) -> Self {
        Self::with_provider(selection, options, TaintDivergence)
    }
}

impl<P> ThreadCoarsening<P> {
    pub fn with_provider(selection: KernelSelection, options: CoarseningOptions, provider: P) -> Self {
        Self {
            selection,
            options,
            provider,
        }
    }
}

impl<P: DivergenceProvider + Debug> Pass for ThreadCoarsening<P> {
    fn name(&self) -> &str {
        "coarsen"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for index in self.selection.indices(module) {
            let name = module.kernels[index].name.clone();
            match coarsen(module, index, &self.options, &self.provider) {
                Ok(result) => {
                    if result.unresolved > 0 {
                        log::warn!("{name}: {} placeholders left unresolved", result.unresolved);
                    }
                    changed |= !result.is_empty();
                }
                Err(e) => log::warn!("{name}: not coarsened: {e}"),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use thrud_ir::{Opcode, dump_module};

    use super::*;

    const STRAIGHT: &str = r#"
kernel @k(ptr global %a, ptr global %b) {
entry:
  %gid = call i64 @get_global_id(0)
  %pa = gep ptr global %a, %gid
  %v = load i32, %pa, align 4
  %w = add i32 %v, 1
  %pb = gep ptr global %b, %gid
  store i32 %w, %pb, align 4
  ret
}
"#;

    fn options(factor: u32) -> CoarseningOptions {
        CoarseningOptions {
            factor,
            ..CoarseningOptions::default()
        }
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut module = thrud_parser::parse(STRAIGHT).unwrap();
        for bad in [
            CoarseningOptions { factor: 0, ..options(1) },
            CoarseningOptions { direction: 3, ..options(2) },
            CoarseningOptions { stride: 0, ..options(2) },
        ] {
            assert!(coarsen(&mut module, 0, &bad, &TaintDivergence).is_err());
        }
        assert!(matches!(
            coarsen(&mut module, 7, &options(2), &TaintDivergence),
            Err(CoarseningError::NoKernel(7))
        ));
    }

    #[test]
    fn factor_one_is_a_noop() {
        let mut module = thrud_parser::parse(STRAIGHT).unwrap();
        let before = dump_module(&module);
        let result = coarsen(&mut module, 0, &options(1), &TaintDivergence).unwrap();
        assert!(result.is_empty());
        assert!(result.clones.is_empty());
        assert_eq!(dump_module(&module), before);
    }

    #[test]
    fn every_divergent_instruction_gets_ordered_clones() {
        let mut module = thrud_parser::parse(STRAIGHT).unwrap();
        let result = coarsen(&mut module, 0, &options(4), &TaintDivergence).unwrap();
        let k = &module.kernels[0];

        // pa, v, w, pb and the store.
        assert_eq!(result.clones.len(), 5);
        assert!(result.clones.values().all(|c| c.len() == 3));
        assert_eq!(result.unresolved, 0);

        let w = k.find("w").unwrap();
        let names: Vec<_> = result.clones[&w]
            .iter()
            .map(|&h| k[h].name.clone().unwrap())
            .collect();
        assert_eq!(names, ["w..cf2", "w..cf3", "w..cf4"]);

        // The third copy of the add reads the third copy of the load.
        let w3 = k.find("w..cf3").unwrap();
        assert_eq!(k[w3].operand(0), Some(Value::Inst(k.find("v..cf3").unwrap())));

        // Address copies index with the generated ids.
        let pa2 = k.find("pa..cf2").unwrap();
        assert_eq!(k[pa2].operand(1), Some(Value::Inst(k.find("gid..cf2").unwrap())));

        // Clones follow the original in copy order.
        let entry = k.entry().unwrap();
        let order: Vec<_> = k.block(entry).instructions().to_vec();
        let pos = |name: &str| order.iter().position(|&h| k[h].name.as_deref() == Some(name));
        assert!(pos("w") < pos("w..cf2"));
        assert!(pos("w..cf2") < pos("w..cf3"));
        assert!(pos("w..cf4") < pos("pb"));
    }

    #[test]
    fn store_clones_use_value_and_address_copies() {
        let mut module = thrud_parser::parse(STRAIGHT).unwrap();
        let result = coarsen(&mut module, 0, &options(2), &TaintDivergence).unwrap();
        let k = &module.kernels[0];
        let store = k
            .instructions()
            .into_iter()
            .find(|&h| matches!(k[h].opcode, Opcode::Store { .. }))
            .unwrap();
        let copy = result.clones[&store][0];
        assert_eq!(
            k[copy].operands(),
            &[
                Value::Inst(k.find("w..cf2").unwrap()),
                Value::Inst(k.find("pb..cf2").unwrap())
            ]
        );
    }

    #[test]
    fn divergent_branch_leaves_kernel_untouched() {
        let src = r#"
kernel @guard(ptr global %out, i64 %n) {
entry:
  %gid = call i64 @get_global_id(0)
  %c = icmp ult i64 %gid, %n
  condbr %c, %then, %exit
then:
  %p = gep ptr global %out, %gid
  store i32 1, %p, align 4
  br %exit
exit:
  ret
}
"#;
        let mut module = thrud_parser::parse(src).unwrap();
        let before = dump_module(&module);
        let err = coarsen(&mut module, 0, &options(2), &TaintDivergence).unwrap_err();
        assert!(matches!(err, CoarseningError::Divergence(_)));
        assert_eq!(dump_module(&module), before);

        let pass = ThreadCoarsening::new(KernelSelection::all(), options(2));
        assert!(!pass.run(&mut module));
        assert_eq!(dump_module(&module), before);
    }

    #[test]
    fn block_level_replicates_shared_variables() {
        let src = r#"
@tile = local [64 x i32]

kernel @k(ptr global %out) {
entry:
  %grp = call i64 @get_group_id(0)
  %lid = call i64 @get_local_id(0)
  %pt = gep ptr local @tile, %lid
  store i32 0, %pt, align 4
  ret
}
"#;
        let mut module = thrud_parser::parse(src).unwrap();
        let opts = CoarseningOptions {
            factor: 3,
            mode: CoarseningMode::BlockLevel,
            ..CoarseningOptions::default()
        };
        let result = coarsen(&mut module, 0, &opts, &TaintDivergence).unwrap();
        let tile = module.find_global("tile").unwrap();
        assert_eq!(result.shared_copies[&tile].len(), 2);
        assert!(module.find_global("tile..cf2").is_some());
        assert!(module.find_global("tile..cf3").is_some());

        let k = &module.kernels[0];
        let pt3 = k.find("pt..cf3").unwrap();
        assert_eq!(
            k[pt3].operand(0),
            Some(Value::Global(module.find_global("tile..cf3").unwrap()))
        );
    }

    #[test]
    fn block_level_copies_of_global_ids_are_distinct() {
        let mut module = thrud_parser::parse(STRAIGHT).unwrap();
        let opts = CoarseningOptions {
            factor: 2,
            mode: CoarseningMode::BlockLevel,
            ..CoarseningOptions::default()
        };
        coarsen(&mut module, 0, &opts, &TaintDivergence).unwrap();
        let k = &module.kernels[0];

        assert!(
            k.instructions()
                .into_iter()
                .all(|h| k[h].callee() != Some("get_global_id")),
            "{}",
            dump_module(&module)
        );
        let pa = k.find("pa").unwrap();
        let pa2 = k.find("pa..cf2").unwrap();
        assert_ne!(k[pa2].operand(1), k[pa].operand(1));
        assert_eq!(k[pa2].operand(1), Some(Value::Inst(k.find("gid..cf2").unwrap())));

        // The copy's id is built from the next group id.
        let off2 = k.find("gid.off..cf2").unwrap();
        assert_eq!(k[off2].operand(0), Some(Value::Inst(k.find("gid.grp..cf2").unwrap())));
        let off = k.find("gid.off").unwrap();
        assert_eq!(k[off].operand(0), Some(Value::Inst(k.find("gid.grp..base").unwrap())));
    }
}

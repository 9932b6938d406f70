//! Cache-line reuse analysis.
//!
//! Decides whether coarsening a kernel along one direction could make
//! several coarsened copies fetch the same cache lines. The analysis
//! interprets the kernel symbolically: every instruction that contributes
//! to the address of a global-memory access is evaluated to one or more
//! [`AccessTensor`]s over a small lane grid, and each access is checked
//! for lines touched by more than one warp or iteration.
//!
//! Loops are approximated by two runs over the body: a base run seeded with
//! the values flowing in from outside the loop and a step run seeded with the
//! values the base run produced for the back edge. Results of both runs are
//! merged into the enclosing scope.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use thrud_ir::{Handle, Instruction, Kernel, Module, Opcode, Value};

use crate::access::{AccessTensor, eval_binary, eval_compare};
use crate::loops::{LoopId, LoopInfo};
use crate::ndrange::{CoordinateKind, DIRECTIONS, NdRange};

/// Value an opaque kernel argument takes in address arithmetic.
pub const ARGUMENT_SENTINEL: i64 = 10000;

/// Lane grid and cache geometry of the modeled device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReuseOptions {
    /// Coarsening direction under consideration.
    pub direction: u32,
    /// Lanes executing in lock step.
    pub warp_size: usize,
    /// Cache line size in bytes.
    pub cache_line_size: u32,
    /// Modeled extent of each direction.
    pub extents: [usize; DIRECTIONS],
}

impl Default for ReuseOptions {
    fn default() -> Self {
        Self {
            direction: 0,
            warp_size: 32,
            cache_line_size: 32,
            extents: [32, 2, 2],
        }
    }
}

/// Kernel shapes the analysis cannot model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsupportedShape {
    /// A loop touching the address computation lacks a canonical induction variable.
    LoopStructure,
    /// An address depends on an operation outside the modeled set.
    UnknownOpcode(String),
    /// An address depends on an operand that is neither a literal, argument, nor instruction.
    UnknownOperand,
    /// A loop header merges more than one value defined later in the loop.
    MultipleForwardDefs,
}

impl fmt::Display for UnsupportedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoopStructure => f.write_str("Loop structure too complicated"),
            Self::UnknownOpcode(op) => write!(f, "Unknown opcode - {op}"),
            Self::UnknownOperand => f.write_str("Unknown operand type"),
            Self::MultipleForwardDefs => f.write_str("More than one fwd def found for loop"),
        }
    }
}

/// The single result of one reuse analysis run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReuseOutcome {
    NoReuse,
    /// Several lanes or iterations touch the same cache lines of `symbol`.
    Reuse { symbol: String },
    /// An address is loaded from memory.
    DataDependent { symbol: String },
    Unsupported(UnsupportedShape),
}

impl ReuseOutcome {
    /// Only positive findings forbid coarsening; shapes the analysis cannot
    /// model are not proven unsafe.
    pub fn permits_coarsening(&self) -> bool {
        !matches!(self, Self::Reuse { .. } | Self::DataDependent { .. })
    }
}

impl fmt::Display for ReuseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReuse => f.write_str("No cache line re-use detected, OK to coarsen"),
            Self::Reuse { symbol } => write!(f, "Cache line re-use in access to [{symbol}]"),
            Self::DataDependent { symbol } => {
                write!(f, "Program is data dependent in access to [{symbol}]")
            }
            Self::Unsupported(shape) => shape.fmt(f),
        }
    }
}

/// Runs the reuse analysis over one kernel. Never mutates the kernel.
pub fn analyze_reuse(
    module: &Module,
    kernel: &Kernel,
    ndr: &NdRange,
    loops: &LoopInfo,
    options: &ReuseOptions,
) -> ReuseOutcome {
    let mut sim = Simulator::new(module, kernel, ndr, loops, options);
    if let Some(finding) = sim.preprocess() {
        return finding;
    }
    let Some(&last) = sim.order.last() else {
        return ReuseOutcome::NoReuse;
    };
    sim.scopes.push(Scope::new());
    sim.simulate(0, last, sim.order.len(), None);
    sim.finding.unwrap_or(ReuseOutcome::NoReuse)
}

/// Symbolic values of the instructions evaluated in one loop run.
type Scope = IndexMap<Handle<Instruction>, Vec<AccessTensor>>;

struct Simulator<'a> {
    module: &'a Module,
    kernel: &'a Kernel,
    ndr: &'a NdRange,
    loops: &'a LoopInfo,
    options: &'a ReuseOptions,
    /// Live instructions in layout order.
    order: Vec<Handle<Instruction>>,
    /// Position of each instruction in `order`.
    position: HashMap<Handle<Instruction>, usize>,
    /// Loop instructions already interpreted by their loop's runs.
    finished: HashSet<Handle<Instruction>>,
    /// Loads and stores through global pointers.
    memops: HashSet<Handle<Instruction>>,
    /// Instructions contributing to a global address.
    relevant: HashSet<Handle<Instruction>>,
    scopes: Vec<Scope>,
    /// Lines seen so far, per accessed symbol.
    seen: HashMap<String, BTreeSet<i64>>,
    /// Lanes in the modeled grid.
    lane_grid: usize,
    finding: Option<ReuseOutcome>,
}

impl<'a> Simulator<'a> {
    fn new(
        module: &'a Module,
        kernel: &'a Kernel,
        ndr: &'a NdRange,
        loops: &'a LoopInfo,
        options: &'a ReuseOptions,
    ) -> Self {
        let mut directions = ndr.id_directions();
        if !directions.contains(&options.direction) {
            directions.push(options.direction);
        }
        let lane_grid = directions
            .iter()
            .filter_map(|&d| options.extents.get(d as usize))
            .map(|&e| e.max(1))
            .product();
        let order = kernel.instructions();
        let position = order.iter().enumerate().map(|(i, &h)| (h, i)).collect();
        Self {
            module,
            kernel,
            ndr,
            loops,
            options,
            order,
            position,
            finished: HashSet::new(),
            memops: HashSet::new(),
            relevant: HashSet::new(),
            scopes: Vec::new(),
            seen: HashMap::new(),
            lane_grid,
            finding: None,
        }
    }

    fn is_global_access(&self, inst: &Instruction) -> bool {
        inst.is_memory_access()
            && inst.pointer_operand().is_some_and(|ptr| {
                self.module.value_type(self.kernel, ptr).address_space()
                    == Some(thrud_ir::AddressSpace::Global)
            })
    }

    /// Collects global accesses and the instructions their addresses depend
    /// on, then checks every loop touching them for a canonical counter.
    fn preprocess(&mut self) -> Option<ReuseOutcome> {
        let mut defs = Vec::new();
        let mut relevant_blocks = HashSet::new();
        for &h in &self.order {
            let inst = &self.kernel[h];
            if !self.is_global_access(inst) {
                continue;
            }
            self.memops.insert(h);
            let Some(ptr) = inst.pointer_operand() else {
                continue;
            };
            let ptr = strip_casts(self.kernel, ptr);
            if let Value::Inst(def) = ptr {
                defs.push(def);
            }
            if self.symbol_name(ptr).is_some() {
                relevant_blocks.extend(inst.parent());
            }
        }

        while let Some(h) = defs.pop() {
            if !self.relevant.insert(h) {
                continue;
            }
            relevant_blocks.extend(self.kernel[h].parent());
            defs.extend(self.kernel[h].operands().iter().filter_map(|v| v.as_inst()));
        }

        for (id, lp) in self.loops.loops() {
            if lp.blocks.iter().any(|b| relevant_blocks.contains(b))
                && self.loops.induction_variable(self.kernel, id).is_none()
            {
                return Some(ReuseOutcome::Unsupported(UnsupportedShape::LoopStructure));
            }
        }
        log::debug!(
            "{}: {} global accesses, {} relevant instructions, {} lanes",
            self.kernel.name,
            self.memops.len(),
            self.relevant.len(),
            self.lane_grid
        );
        None
    }

    /// Name of the symbol a pointer addresses: the base of an address-index
    /// step, or the pointer itself.
    fn symbol_name(&self, ptr: Value) -> Option<String> {
        let named = |value: Value| match value {
            Value::Param(i) => self.kernel.params.get(i as usize).map(|p| p.name.clone()),
            Value::Global(g) => self.module.globals.try_get(g).map(|gv| gv.name.clone()),
            Value::Inst(h) => self.kernel[h].name.clone(),
            Value::Const(_) | Value::Undef => None,
        };
        match strip_casts(self.kernel, ptr) {
            Value::Inst(h) => match self.kernel[h].opcode {
                Opcode::GetElementPtr => named(strip_casts(self.kernel, self.kernel[h].operand(0)?)),
                Opcode::Load { .. } => self.symbol_name(self.kernel[h].operand(0)?),
                _ => None,
            },
            other => named(other),
        }
    }

    /// Symbol accessed by a load or store.
    fn accessed_symbol(&self, inst: Handle<Instruction>) -> String {
        self.kernel[inst]
            .pointer_operand()
            .and_then(|ptr| self.symbol_name(ptr))
            .unwrap_or_default()
    }

    fn lookup(&self, inst: Handle<Instruction>) -> Option<&Vec<AccessTensor>> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&inst))
    }

    fn operand(&mut self, value: Value) -> Vec<AccessTensor> {
        match value {
            Value::Const(c) => vec![AccessTensor::scalar(c)],
            Value::Inst(h) => self.lookup(h).cloned().unwrap_or_default(),
            Value::Param(_) => vec![AccessTensor::scalar(ARGUMENT_SENTINEL)],
            Value::Undef => Vec::new(),
            Value::Global(_) => {
                self.finding = Some(ReuseOutcome::Unsupported(UnsupportedShape::UnknownOperand));
                Vec::new()
            }
        }
    }

    fn operand_at(&mut self, inst: Handle<Instruction>, index: usize) -> Vec<AccessTensor> {
        match self.kernel[inst].operand(index) {
            Some(value) => self.operand(value),
            None => Vec::new(),
        }
    }

    fn define(&mut self, inst: Handle<Instruction>, tensors: Vec<AccessTensor>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(inst, tensors);
        }
    }

    fn merge(&mut self, scope: Scope) {
        let Some(top) = self.scopes.last_mut() else {
            return;
        };
        for (inst, tensors) in scope {
            top.entry(inst).or_default().extend(tensors);
        }
    }

    fn apply(&mut self, inst: Handle<Instruction>, f: impl Fn(i64, i64) -> i64) {
        let lhs = self.operand_at(inst, 0);
        let rhs = self.operand_at(inst, 1);
        let result = lhs
            .iter()
            .flat_map(|a| rhs.iter().map(|b| a.combine(b, &f)))
            .collect();
        self.define(inst, result);
    }

    /// Interprets from `cursor` up to and including `stop`, without passing
    /// `limit`, or until a finding is made. Inside a loop run only the loop's
    /// own blocks are interpreted. Returns the cursor after the last
    /// instruction.
    fn simulate(
        &mut self,
        mut cursor: usize,
        stop: Handle<Instruction>,
        limit: usize,
        innermost: Option<LoopId>,
    ) -> usize {
        while cursor < limit {
            let Some(&inst) = self.order.get(cursor) else {
                return cursor;
            };
            let done = inst == stop || self.finding.is_some();
            cursor += 1;
            let outside = innermost.is_some_and(|lp| {
                self.kernel[inst]
                    .parent()
                    .is_none_or(|block| !self.loops.get(lp).contains(block))
            });
            if self.finding.is_none() && !outside && !self.finished.contains(&inst) {
                if self.relevant.contains(&inst) {
                    cursor = self.evaluate(inst, cursor, innermost);
                } else if self.memops.contains(&inst) {
                    self.check_access(inst);
                }
            }
            if done {
                return cursor;
            }
        }
        cursor
    }

    fn evaluate(&mut self, inst: Handle<Instruction>, cursor: usize, innermost: Option<LoopId>) -> usize {
        if let Some(c) = self.ndr.coordinate(inst) {
            let tensor = match c.kind {
                CoordinateKind::GlobalId | CoordinateKind::LocalId => {
                    let extent = self.options.extents[c.direction as usize];
                    AccessTensor::from_direction(c.direction as usize, extent)
                }
                CoordinateKind::GlobalSize | CoordinateKind::LocalSize => {
                    AccessTensor::from_size(&self.options.extents)
                }
                CoordinateKind::GroupId => AccessTensor::group_id(),
                CoordinateKind::GroupCount => AccessTensor::group_count(),
            };
            self.define(inst, vec![tensor]);
            return cursor;
        }

        let kernel = self.kernel;
        match &kernel[inst].opcode {
            Opcode::Load { .. } | Opcode::Store { .. } => {
                let symbol = self.accessed_symbol(inst);
                self.finding = Some(ReuseOutcome::DataDependent { symbol });
            }
            &Opcode::Binary(op) => self.apply(inst, |a, b| eval_binary(op, a, b)),
            &Opcode::ICmp(pred) => self.apply(inst, |a, b| eval_compare(pred, a, b)),
            Opcode::Select => {
                let preds = self.operand_at(inst, 0);
                let accepts = self.operand_at(inst, 1);
                let rejects = self.operand_at(inst, 2);
                let mut result = Vec::new();
                for p in &preds {
                    for a in &accepts {
                        for r in &rejects {
                            result.push(AccessTensor::select(p, a, r));
                        }
                    }
                }
                self.define(inst, result);
            }
            Opcode::Cast(_) => {
                let tensors = self.operand_at(inst, 0);
                self.define(inst, tensors);
            }
            Opcode::GetElementPtr => {
                let tensors = self.operand_at(inst, 1);
                self.define(inst, tensors);
            }
            Opcode::Phi { .. } => return self.evaluate_phi(inst, cursor, innermost),
            other => {
                self.finding = Some(ReuseOutcome::Unsupported(UnsupportedShape::UnknownOpcode(
                    other.mnemonic().to_string(),
                )));
            }
        }
        cursor
    }

    /// Index just past the last instruction of loop `lp` in layout order.
    fn loop_end(&self, lp: LoopId) -> usize {
        self.loops
            .get(lp)
            .blocks
            .iter()
            .filter_map(|&b| self.kernel.block(b).instructions().last())
            .filter_map(|h| self.position.get(h))
            .max()
            .map_or(self.order.len(), |&i| i + 1)
    }

    fn loop_instructions(&self, lp: LoopId) -> HashSet<Handle<Instruction>> {
        self.loops
            .get(lp)
            .blocks
            .iter()
            .flat_map(|&b| self.kernel.block(b).instructions().iter().copied())
            .collect()
    }

    /// A fresh loop header is interpreted twice over the loop body, then the
    /// loop's instructions are marked finished so the enclosing run skips
    /// them. Returns `cursor` unchanged: the enclosing run carries on with
    /// whatever follows the header outside the loop.
    fn evaluate_phi(&mut self, inst: Handle<Instruction>, cursor: usize, innermost: Option<LoopId>) -> usize {
        let header_loop = self.kernel[inst].parent().and_then(|block| {
            self.loops
                .loop_for(block)
                .filter(|&id| Some(id) != innermost && self.loops.get(id).header == block)
        });
        let operands = self.kernel[inst].operands().to_vec();

        let Some(lp) = header_loop else {
            let mut joined = Vec::new();
            for value in operands {
                joined.extend(self.operand(value));
            }
            self.define(inst, joined);
            return cursor;
        };

        let mut forward = None;
        let mut base = Vec::new();
        for value in operands {
            match value {
                Value::Inst(h) if self.lookup(h).is_none() => {
                    if forward.is_some() {
                        self.finding = Some(ReuseOutcome::Unsupported(UnsupportedShape::MultipleForwardDefs));
                    }
                    forward = Some(h);
                }
                other => base.extend(self.operand(other)),
            }
        }
        let Some(forward) = forward else {
            self.define(inst, base);
            return cursor;
        };
        if self.finding.is_some() {
            return cursor;
        }
        log::debug!(
            "{}: loop at {:?}, running to {:?}",
            self.kernel.name,
            inst,
            forward
        );

        let end = self.loop_end(lp);
        let body = self.loop_instructions(lp);

        for h in &body {
            self.finished.remove(h);
        }
        self.scopes.push(Scope::from([(inst, base)]));
        self.simulate(cursor, forward, end, Some(lp));
        let base_scope = self.scopes.pop().unwrap_or_default();
        if self.finding.is_some() {
            return cursor;
        }

        let step = base_scope.get(&forward).cloned().unwrap_or_default();
        for h in &body {
            self.finished.remove(h);
        }
        self.scopes.push(Scope::from([(inst, step)]));
        let reached = self.simulate(cursor, forward, end, Some(lp));
        let step_scope = self.scopes.pop().unwrap_or_default();

        self.merge(base_scope);
        self.merge(step_scope);
        self.finished
            .extend(self.order[cursor..reached].iter().copied().filter(|h| body.contains(h)));
        cursor
    }

    /// Whether the address computation of `ptr` depends on any ND-range query.
    fn reaches_coordinate(&self, ptr: Value) -> bool {
        let mut stack: Vec<Handle<Instruction>> = ptr.as_inst().into_iter().collect();
        let mut visited = HashSet::new();
        while let Some(h) = stack.pop() {
            if !visited.insert(h) {
                continue;
            }
            if self.ndr.is_coordinate(h) {
                return true;
            }
            stack.extend(self.kernel[h].operands().iter().filter_map(|v| v.as_inst()));
        }
        false
    }

    /// A scalar access is uniform across the lane grid and counts as reuse
    /// only when its address is derived from an ND-range query. Scalar
    /// accesses through a bare argument pointer or a constant offset are
    /// left alone.
    fn check_access(&mut self, inst: Handle<Instruction>) {
        let kernel = self.kernel;
        let access = &kernel[inst];
        let is_store = matches!(access.opcode, Opcode::Store { .. });
        let align = access.alignment().unwrap_or(1);
        let Some(ptr) = access.pointer_operand().map(|p| strip_casts(self.kernel, p)) else {
            return;
        };
        let Some(symbol) = self.symbol_name(ptr) else {
            log::debug!("{}: skipping access {:?} without a symbol", self.kernel.name, inst);
            return;
        };

        let tensors = self.operand(ptr);
        let indexed = self.reaches_coordinate(ptr);
        let mut added = BTreeSet::new();
        for tensor in &tensors {
            let accesses = tensor.mem_accesses(self.options.warp_size, align, self.options.cache_line_size);
            let unique = accesses.distinct_lines();
            let mut duplicates = accesses.lines.len() - unique.len();
            if duplicates == 0 && unique.len() > 1 {
                duplicates = self
                    .seen
                    .get(&symbol)
                    .map_or(0, |prev| prev.intersection(&unique).count());
            }
            let uniform = indexed && tensor.is_scalar() && self.lane_grid > 1;
            added.extend(unique.iter().copied());

            if is_store && accesses.fully_coalesced {
                log::debug!("{}: ignoring fully coalesced store to [{symbol}]", self.kernel.name);
            } else if (duplicates > 0 && unique.len() > 1) || uniform {
                self.finding = Some(ReuseOutcome::Reuse { symbol: symbol.clone() });
                break;
            }
        }
        self.seen.entry(symbol).or_default().extend(added);
    }
}

/// Follows no-op pointer casts back to their source.
fn strip_casts(kernel: &Kernel, mut value: Value) -> Value {
    while let Value::Inst(h) = value {
        match (&kernel[h].opcode, kernel[h].operand(0)) {
            (Opcode::Cast(thrud_ir::CastOp::BitCast), Some(source)) => value = source,
            _ => break,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, options: &ReuseOptions) -> ReuseOutcome {
        let module = thrud_parser::parse(source).unwrap();
        let kernel = &module.kernels[0];
        let ndr = NdRange::analyze(kernel);
        let loops = LoopInfo::analyze(kernel);
        analyze_reuse(&module, kernel, &ndr, &loops, options)
    }

    #[test]
    fn global_id_indexing_is_safe() {
        let src = r#"
kernel @copy(ptr global %buf, ptr global %out) {
entry:
  %gid = call i64 @get_global_id(0)
  %p = gep ptr global %buf, %gid
  %v = load i32, %p, align 4
  %q = gep ptr global %out, %gid
  store i32 %v, %q, align 4
  ret
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::NoReuse);
        assert_eq!(outcome.to_string(), "No cache line re-use detected, OK to coarsen");
    }

    #[test]
    fn group_id_indexing_is_reuse() {
        let src = r#"
kernel @bcast(ptr global %buf) {
entry:
  %g = call i64 @get_group_id(0)
  %p = gep ptr global %buf, %g
  %v = load i32, %p, align 4
  ret
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::Reuse { symbol: "buf".into() });
        assert_eq!(outcome.to_string(), "Cache line re-use in access to [buf]");
        assert!(!outcome.permits_coarsening());
    }

    #[test]
    fn coalesced_uniform_store_is_ignored() {
        let src = r#"
kernel @flag(ptr global %out) {
entry:
  %gid = call i64 @get_global_id(0)
  store i32 1, %out, align 4
  ret
}
"#;
        assert_eq!(run(src, &ReuseOptions::default()), ReuseOutcome::NoReuse);
    }

    #[test]
    fn indirect_address_is_data_dependent() {
        let src = r#"
kernel @gather(ptr global %idx, ptr global %src) {
entry:
  %gid = call i64 @get_global_id(0)
  %pi = gep ptr global %idx, %gid
  %i = load i64, %pi, align 8
  %ps = gep ptr global %src, %i
  %v = load i32, %ps, align 4
  ret
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::DataDependent { symbol: "idx".into() });
        assert_eq!(outcome.to_string(), "Program is data dependent in access to [idx]");
    }

    #[test]
    fn strided_reads_overlapping_across_warps() {
        // Pairs of lanes share an element.
        let src = r#"
kernel @half(ptr global %buf) {
entry:
  %gid = call i64 @get_global_id(0)
  %h = udiv i64 %gid, 2
  %p = gep ptr global %buf, %h
  %v = load i32, %p, align 4
  ret
}
"#;
        let options = ReuseOptions {
            warp_size: 8,
            ..ReuseOptions::default()
        };
        // Two consecutive warps of 8 lanes land in the same line.
        assert_eq!(run(src, &options), ReuseOutcome::Reuse { symbol: "buf".into() });
    }

    #[test]
    fn loop_iterations_revisit_lines() {
        let src = include_str!("../../../kernels/mm.tir");
        assert_eq!(
            run(src, &ReuseOptions::default()),
            ReuseOutcome::Reuse { symbol: "a".into() }
        );
    }

    #[test]
    fn non_canonical_loop_is_unsupported() {
        let src = r#"
kernel @k(ptr global %buf) {
entry:
  %gid = call i64 @get_global_id(0)
  br %body
body:
  %i = phi i64 [1, %entry], [%next, %body]
  %a = add i64 %gid, %i
  %p = gep ptr global %buf, %a
  store i32 0, %p, align 4
  %next = mul i64 %i, 2
  %c = icmp ult i64 %next, 64
  condbr %c, %body, %exit
exit:
  ret
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::Unsupported(UnsupportedShape::LoopStructure));
        assert_eq!(outcome.to_string(), "Loop structure too complicated");
        assert!(outcome.permits_coarsening());
    }

    #[test]
    fn unknown_opcode_in_address() {
        let src = r#"
kernel @k(ptr global %buf) {
entry:
  %gid = call i64 @get_global_id(0)
  %h = hash i64 %gid
  %p = gep ptr global %buf, %h
  store i32 0, %p, align 4
  ret
}
"#;
        assert_eq!(
            run(src, &ReuseOptions::default()).to_string(),
            "Unknown opcode - hash"
        );
    }

    #[test]
    fn symbol_is_the_nearest_named_base() {
        let src = r#"
kernel @k(ptr global %buf) {
entry:
  %g = call i64 @get_group_id(0)
  %p = gep ptr global %buf, %g
  %q = gep ptr global %p, 1
  %v = load i32, %q, align 4
  ret
}
"#;
        assert_eq!(
            run(src, &ReuseOptions::default()),
            ReuseOutcome::Reuse { symbol: "p".into() }
        );
    }

    #[test]
    fn global_in_address_arithmetic_is_unknown_operand() {
        let src = r#"
@g = global [4 x i32]

kernel @k(ptr global %a) {
entry:
  %gid = call i64 @get_global_id(0)
  %off = add i64 %gid, @g
  %p = gep ptr global %a, %off
  %v = load i32, %p, align 4
  ret
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::Unsupported(UnsupportedShape::UnknownOperand));
        assert_eq!(outcome.to_string(), "Unknown operand type");
        assert!(outcome.permits_coarsening());
    }

    #[test]
    fn header_with_two_unseen_incoming_values() {
        // The preheader is laid out after the loop, so neither incoming
        // value of %i has been interpreted when the header is reached.
        let src = r#"
kernel @k(ptr global %a) {
entry:
  %gid = call i64 @get_global_id(0)
  br %pre
body:
  %i = phi i64 [%start, %pre], [%i.next, %body]
  %p = gep ptr global %a, %i
  %v = load i32, %p, align 4
  %i.next = add i64 %i, 1
  %more = icmp ult i64 %i.next, 8
  condbr %more, %body, %exit
exit:
  ret
pre:
  %start = add i64 %gid, 0
  br %body
}
"#;
        let outcome = run(src, &ReuseOptions::default());
        assert_eq!(outcome, ReuseOutcome::Unsupported(UnsupportedShape::MultipleForwardDefs));
        assert_eq!(outcome.to_string(), "More than one fwd def found for loop");
    }

    #[test]
    fn scalar_reads_through_argument_pointers_are_not_reuse() {
        let src = r#"
kernel @k(ptr global %buf, ptr global %out) {
entry:
  %gid = call i64 @get_global_id(0)
  %v = load i32, %buf, align 4
  %c = gep ptr global %buf, 7
  %w = load i32, %c, align 4
  %q = gep ptr global %out, %gid
  store i32 %v, %q, align 4
  ret
}
"#;
        assert_eq!(run(src, &ReuseOptions::default()), ReuseOutcome::NoReuse);
    }

    #[test]
    fn loop_runs_skip_blocks_outside_the_loop() {
        // %exit sits between the header and the latch; it runs once, after
        // the loop, with the merged values of %k.
        let src = r#"
kernel @k(ptr global %b) {
entry:
  %gid = call i64 @get_global_id(0)
  br %head
head:
  %k = phi i64 [0, %entry], [%k.next, %latch]
  %more = icmp ult i64 %k, 4
  condbr %more, %latch, %exit
exit:
  %idx = add i64 %gid, %k
  %p = gep ptr global %b, %idx
  %v = load i32, %p, align 4
  ret
latch:
  %k.next = add i64 %k, 1
  br %head
}
"#;
        assert_eq!(run(src, &ReuseOptions::default()), ReuseOutcome::NoReuse);
    }
}

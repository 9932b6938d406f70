//! Coordinate-space classification.
//!
//! Catalogs the calls a kernel makes to the six built-in index-space
//! queries, bucketed by kind and direction. The catalog is a plain value:
//! passes that need it receive it by reference, and passes that delete or
//! create coordinate calls keep it current with [`NdRange::register`] and
//! [`NdRange::unregister`].

use std::collections::HashMap;

use thrud_ir::{Handle, Instruction, Kernel, Value};

/// Number of index-space directions.
pub const DIRECTIONS: usize = 3;

/// The built-in index-space queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordinateKind {
    GlobalId,
    LocalId,
    GlobalSize,
    LocalSize,
    GroupId,
    GroupCount,
}

impl CoordinateKind {
    pub const ALL: [Self; 6] = [
        Self::GlobalId,
        Self::LocalId,
        Self::GlobalSize,
        Self::LocalSize,
        Self::GroupId,
        Self::GroupCount,
    ];

    /// Name of the built-in function implementing this query.
    pub fn builtin(self) -> &'static str {
        match self {
            Self::GlobalId => "get_global_id",
            Self::LocalId => "get_local_id",
            Self::GlobalSize => "get_global_size",
            Self::LocalSize => "get_local_size",
            Self::GroupId => "get_group_id",
            Self::GroupCount => "get_num_groups",
        }
    }

    pub fn from_builtin(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.builtin() == name)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A classified coordinate call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coordinate {
    pub kind: CoordinateKind,
    pub direction: u32,
}

/// Reads the coordinate kind and literal direction of a call, if it is one.
pub fn classify(inst: &Instruction) -> Option<Coordinate> {
    let kind = CoordinateKind::from_builtin(inst.callee()?)?;
    match inst.operands() {
        [Value::Const(d)] if (0..DIRECTIONS as i64).contains(d) => Some(Coordinate {
            kind,
            direction: *d as u32,
        }),
        _ => None,
    }
}

/// Catalog of a kernel's coordinate calls.
#[derive(Clone, Debug, Default)]
pub struct NdRange {
    /// `calls[direction][kind]`, in program order.
    calls: [[Vec<Handle<Instruction>>; 6]; DIRECTIONS],
    index: HashMap<Handle<Instruction>, Coordinate>,
}

impl NdRange {
    /// Scans `kernel` once and catalogs every coordinate call with a literal
    /// direction. Calls with a non-literal direction are left out.
    pub fn analyze(kernel: &Kernel) -> Self {
        let mut ndr = Self::default();
        for handle in kernel.instructions() {
            let inst = &kernel[handle];
            let Some(kind) = inst.callee().and_then(CoordinateKind::from_builtin) else {
                continue;
            };
            match classify(inst) {
                Some(c) => ndr.register(c.kind, c.direction, handle),
                None => log::debug!(
                    "{}: {} call {:?} has no literal direction, not cataloged",
                    kernel.name,
                    kind.builtin(),
                    handle
                ),
            }
        }
        ndr
    }

    /// Adds a call site to the catalog.
    pub fn register(&mut self, kind: CoordinateKind, direction: u32, inst: Handle<Instruction>) {
        let Some(per_kind) = self.calls.get_mut(direction as usize) else {
            return;
        };
        per_kind[kind.slot()].push(inst);
        self.index.insert(inst, Coordinate { kind, direction });
    }

    /// Removes a call site. Returns `false` if it was not cataloged.
    pub fn unregister(&mut self, inst: Handle<Instruction>) -> bool {
        let Some(c) = self.index.remove(&inst) else {
            return false;
        };
        self.calls[c.direction as usize][c.kind.slot()].retain(|&h| h != inst);
        true
    }

    /// Calls of `kind` in `direction`.
    pub fn calls(&self, kind: CoordinateKind, direction: u32) -> &[Handle<Instruction>] {
        match self.calls.get(direction as usize) {
            Some(per_kind) => &per_kind[kind.slot()],
            None => &[],
        }
    }

    /// Calls of `kind` in every direction, direction-major.
    pub fn calls_all(&self, kind: CoordinateKind) -> Vec<Handle<Instruction>> {
        (0..DIRECTIONS as u32)
            .flat_map(|d| self.calls(kind, d).iter().copied())
            .collect()
    }

    pub fn global_ids(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::GlobalId, direction)
    }

    pub fn local_ids(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::LocalId, direction)
    }

    pub fn group_ids(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::GroupId, direction)
    }

    pub fn global_sizes(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::GlobalSize, direction)
    }

    pub fn local_sizes(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::LocalSize, direction)
    }

    pub fn group_counts(&self, direction: u32) -> &[Handle<Instruction>] {
        self.calls(CoordinateKind::GroupCount, direction)
    }

    /// Global and local ids in `direction`: the queries that differ between
    /// threads of one group.
    pub fn divergent_ids(&self, direction: u32) -> Vec<Handle<Instruction>> {
        let mut ids = self.global_ids(direction).to_vec();
        ids.extend_from_slice(self.local_ids(direction));
        ids
    }

    /// Divergent ids of every direction.
    pub fn all_divergent_ids(&self) -> Vec<Handle<Instruction>> {
        (0..DIRECTIONS as u32)
            .flat_map(|d| self.divergent_ids(d))
            .collect()
    }

    /// Global and local size queries in `direction`.
    pub fn sizes(&self, direction: u32) -> Vec<Handle<Instruction>> {
        let mut sizes = self.global_sizes(direction).to_vec();
        sizes.extend_from_slice(self.local_sizes(direction));
        sizes
    }

    pub fn coordinate(&self, inst: Handle<Instruction>) -> Option<Coordinate> {
        self.index.get(&inst).copied()
    }

    fn is_kind(&self, inst: Handle<Instruction>, kind: CoordinateKind) -> bool {
        self.coordinate(inst).is_some_and(|c| c.kind == kind)
    }

    pub fn is_coordinate(&self, inst: Handle<Instruction>) -> bool {
        self.index.contains_key(&inst)
    }

    pub fn is_global_id(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::GlobalId)
    }

    pub fn is_local_id(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::LocalId)
    }

    /// Global or local id.
    pub fn is_divergent_id(&self, inst: Handle<Instruction>) -> bool {
        self.is_global_id(inst) || self.is_local_id(inst)
    }

    pub fn is_global_size(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::GlobalSize)
    }

    pub fn is_local_size(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::LocalSize)
    }

    /// Global or local size.
    pub fn is_size(&self, inst: Handle<Instruction>) -> bool {
        self.is_global_size(inst) || self.is_local_size(inst)
    }

    pub fn is_group_id(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::GroupId)
    }

    pub fn is_group_count(&self, inst: Handle<Instruction>) -> bool {
        self.is_kind(inst, CoordinateKind::GroupCount)
    }

    pub fn direction_of(&self, inst: Handle<Instruction>) -> Option<u32> {
        self.coordinate(inst).map(|c| c.direction)
    }

    /// Directions that have at least one divergent id.
    pub fn id_directions(&self) -> Vec<u32> {
        (0..DIRECTIONS as u32)
            .filter(|&d| !self.global_ids(d).is_empty() || !self.local_ids(d).is_empty())
            .collect()
    }

    /// Number of cataloged calls.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

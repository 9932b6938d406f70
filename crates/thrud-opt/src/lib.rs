//! Kernel rewrites for thrud.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] running an ordered pipeline,
//! the thread coarsening transformer and the small rewrites it is usually
//! combined with (no-alias annotation, global-id decomposition, occupancy
//! reduction), plus two read-only passes (reuse check, IR validation).

mod coarsening;
mod occupancy;
mod replace_ids;
mod restrict;
mod reuse;
mod validation;

pub use coarsening::{Coarsening, CoarseningError, CoarseningOptions, ThreadCoarsening, coarsen};
pub use occupancy::{OccupancyReduction, reduce_occupancy};
pub use replace_ids::{ReplaceGlobalIds, replace_global_ids};
pub use restrict::AssumeRestrict;
pub use reuse::{ReuseCheck, check_reuse};
pub use validation::{IrValidation, validate_module};

use std::fmt::Debug;

use thrud_ir::{Kernel, Module};

/// A transformation over a whole module.
pub trait Pass: Debug {
    /// Name used on the command line.
    fn name(&self) -> &str;

    /// Run the pass on a module. Returns `true` if anything was modified.
    fn run(&self, module: &mut Module) -> bool;
}

/// Which kernels a pass applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelSelection(Option<String>);

impl KernelSelection {
    /// Every kernel of the module.
    pub fn all() -> Self {
        Self(None)
    }

    /// Only the kernel called `name`; an empty name selects every kernel.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() { Self(None) } else { Self(Some(name)) }
    }

    pub fn matches(&self, kernel: &Kernel) -> bool {
        self.0.as_deref().is_none_or(|name| name == kernel.name)
    }

    /// Indices of the selected kernels.
    pub fn indices(&self, module: &Module) -> Vec<usize> {
        module
            .kernels
            .iter()
            .enumerate()
            .filter(|(_, k)| self.matches(k))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Runs passes once each, in insertion order.
///
/// Coarsening is not idempotent, so there is no fixed-point iteration.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Adds a pass to the end of the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs the pipeline. Returns `true` if any pass modified the module.
    pub fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for pass in &self.passes {
            let modified = pass.run(module);
            log::debug!("pass '{}' modified module: {modified}", pass.name());
            changed |= modified;
        }
        changed
    }
}

//! Analyses over thrud kernels.
//!
//! - [`ndrange`]: catalog of index-space queries per kind and direction.
//! - [`loops`]: dominators, natural loops and canonical induction variables.
//! - [`divergence`]: per-thread values and divergent regions along an axis.
//! - [`access`]: symbolic access tensors and cache-line accounting.
//! - [`reuse`]: cache-line reuse prediction for a coarsening direction.
//!
//! Analyses never mutate the kernels they inspect.

pub mod access;
pub mod divergence;
pub mod loops;
pub mod ndrange;
pub mod reuse;

pub use access::{AccessTensor, MemAccesses};
pub use divergence::{
    CoarseningMode, DivergenceError, DivergenceInfo, DivergenceProvider, DivergentRegion,
    PrecomputedDivergence, TaintDivergence,
};
pub use loops::{Dominators, Loop, LoopId, LoopInfo};
pub use ndrange::{Coordinate, CoordinateKind, DIRECTIONS, NdRange};
pub use reuse::{ReuseOptions, ReuseOutcome, UnsupportedShape, analyze_reuse};

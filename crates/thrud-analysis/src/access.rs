//! Symbolic access tensors.
//!
//! An [`AccessTensor`] models the integer a single instruction produces in
//! every lane of a small lane grid spanning up to three directions. A
//! direction the value does not vary along has extent 1; a scalar has extent
//! 1 everywhere. Tensors are immutable: arithmetic broadcasts both operands
//! to the per-direction maximum extent and builds a new tensor.

use std::collections::BTreeSet;

use thrud_ir::{BinaryOp, CmpPredicate};

use crate::ndrange::DIRECTIONS;

/// Per-lane integer values over a lane grid of up to three directions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessTensor {
    sizes: [usize; DIRECTIONS],
    /// Row-major with direction 0 fastest.
    values: Vec<i64>,
}

/// Cache lines touched by one access tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemAccesses {
    /// Line ids, deduplicated within each warp and concatenated across warps.
    pub lines: Vec<i64>,
    /// Consecutive lanes touched consecutive elements, one full line at a time.
    pub fully_coalesced: bool,
}

impl MemAccesses {
    /// Distinct lines over all warps.
    pub fn distinct_lines(&self) -> BTreeSet<i64> {
        self.lines.iter().copied().collect()
    }

    /// Number of line ids that repeat across warps.
    pub fn duplicates(&self) -> usize {
        self.lines.len() - self.distinct_lines().len()
    }
}

impl AccessTensor {
    pub fn scalar(value: i64) -> Self {
        Self {
            sizes: [1; DIRECTIONS],
            values: vec![value],
        }
    }

    /// Identity tensor `0..extent` varying along `direction` only.
    pub fn from_direction(direction: usize, extent: usize) -> Self {
        let extent = extent.max(1);
        let mut sizes = [1; DIRECTIONS];
        if let Some(size) = sizes.get_mut(direction) {
            *size = extent;
        } else {
            return Self::scalar(0);
        }
        Self {
            sizes,
            values: (0..extent as i64).collect(),
        }
    }

    /// Size queries model the whole index space: the product of all extents.
    pub fn from_size(extents: &[usize; DIRECTIONS]) -> Self {
        let total = extents
            .iter()
            .fold(1i64, |acc, &e| acc.wrapping_mul(e.max(1) as i64));
        Self::scalar(total)
    }

    /// Group ids are not modeled across groups: every lane sees group 0.
    pub fn group_id() -> Self {
        Self::scalar(0)
    }

    /// Group counts are not modeled: a single group.
    pub fn group_count() -> Self {
        Self::scalar(1)
    }

    pub fn sizes(&self) -> [usize; DIRECTIONS] {
        self.sizes
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn is_scalar(&self) -> bool {
        self.values.len() == 1
    }

    /// The value of a scalar tensor.
    pub fn as_scalar(&self) -> Option<i64> {
        if self.is_scalar() {
            self.values.first().copied()
        } else {
            None
        }
    }

    pub fn lanes(&self) -> usize {
        self.values.len()
    }

    /// Value at lane `(i, j, k)`, broadcasting directions of extent 1.
    pub fn get(&self, i: usize, j: usize, k: usize) -> i64 {
        let [x, y, z] = self.sizes;
        let i = if x > 1 { i } else { 0 };
        let j = if y > 1 { j } else { 0 };
        let k = if z > 1 { k } else { 0 };
        self.values[(k * y + j) * x + i]
    }

    fn broadcast(sizes: [[usize; DIRECTIONS]; 3], len: usize, f: impl Fn(usize, usize, usize) -> i64) -> Self {
        let mut out = [1; DIRECTIONS];
        for d in 0..DIRECTIONS {
            out[d] = sizes[..len].iter().map(|s| s[d]).max().unwrap_or(1);
        }
        let mut values = Vec::with_capacity(out.iter().product());
        for k in 0..out[2] {
            for j in 0..out[1] {
                for i in 0..out[0] {
                    values.push(f(i, j, k));
                }
            }
        }
        Self { sizes: out, values }
    }

    /// Lane-wise `f(self, other)`.
    pub fn combine(&self, other: &Self, f: impl Fn(i64, i64) -> i64) -> Self {
        if let (Some(a), Some(b)) = (self.as_scalar(), other.as_scalar()) {
            return Self::scalar(f(a, b));
        }
        Self::broadcast([self.sizes, other.sizes, [1; DIRECTIONS]], 2, |i, j, k| {
            f(self.get(i, j, k), other.get(i, j, k))
        })
    }

    /// Lane-wise `pred != 0 ? accept : reject`.
    pub fn select(pred: &Self, accept: &Self, reject: &Self) -> Self {
        if let (Some(p), Some(a), Some(b)) = (pred.as_scalar(), accept.as_scalar(), reject.as_scalar()) {
            return Self::scalar(if p != 0 { a } else { b });
        }
        Self::broadcast([pred.sizes, accept.sizes, reject.sizes], 3, |i, j, k| {
            if pred.get(i, j, k) != 0 {
                accept.get(i, j, k)
            } else {
                reject.get(i, j, k)
            }
        })
    }

    /// Cache lines touched when the tensor's values are used as element
    /// indices of `align`-byte elements.
    ///
    /// Lanes are walked in warps of `warp_size` along direction 0. A line id
    /// is the byte address rounded down to `cache_line_size`. The access is
    /// fully coalesced when consecutive lanes read consecutive elements in
    /// runs of `cache_line_size / align`.
    pub fn mem_accesses(&self, warp_size: usize, align: u32, cache_line_size: u32) -> MemAccesses {
        let warp_size = warp_size.max(1);
        let align = i64::from(align.max(1));
        let line = i64::from(cache_line_size.max(1));
        let run = line / align;

        let mut lines = Vec::new();
        let mut warp = BTreeSet::new();
        let mut fully_coalesced = true;
        let mut counter: i64 = 0;
        let mut last: i64 = -1;
        let [x, y, z] = self.sizes;
        for k in 0..z {
            for j in 0..y {
                for start in (0..x).step_by(warp_size) {
                    for i in start..(start + warp_size).min(x) {
                        let value = self.values[(k * y + j) * x + i];
                        warp.insert(line_of(value, align, line));
                        if counter > 0 && last != value.wrapping_sub(1) {
                            fully_coalesced = false;
                            counter = -1;
                        }
                        last = value;
                        counter += 1;
                        if counter == run {
                            counter = 0;
                        }
                    }
                    lines.extend(std::mem::take(&mut warp));
                }
            }
        }
        MemAccesses {
            lines,
            fully_coalesced,
        }
    }
}

fn line_of(value: i64, align: i64, line: i64) -> i64 {
    value.wrapping_mul(align).wrapping_div(line).wrapping_mul(line)
}

/// Evaluates an integer binary operator with wrapping semantics.
///
/// Division and remainder by zero yield 0; shift amounts use their low bits.
pub fn eval_binary(op: BinaryOp, a: i64, b: i64) -> i64 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::UDiv => (a as u64).checked_div(b as u64).map_or(0, |v| v as i64),
        BinaryOp::SDiv => a.checked_div(b).unwrap_or(0),
        BinaryOp::URem => (a as u64).checked_rem(b as u64).map_or(0, |v| v as i64),
        BinaryOp::SRem => a.checked_rem(b).unwrap_or(0),
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::LShr => (a as u64).wrapping_shr(b as u32) as i64,
        BinaryOp::AShr => a.wrapping_shr(b as u32),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    }
}

/// Evaluates an integer comparison to 0 or 1.
pub fn eval_compare(pred: CmpPredicate, a: i64, b: i64) -> i64 {
    let (ua, ub) = (a as u64, b as u64);
    let holds = match pred {
        CmpPredicate::Eq => a == b,
        CmpPredicate::Ne => a != b,
        CmpPredicate::Ugt => ua > ub,
        CmpPredicate::Uge => ua >= ub,
        CmpPredicate::Ult => ua < ub,
        CmpPredicate::Ule => ua <= ub,
        CmpPredicate::Sgt => a > b,
        CmpPredicate::Sge => a >= b,
        CmpPredicate::Slt => a < b,
        CmpPredicate::Sle => a <= b,
    };
    i64::from(holds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fast_path() {
        let a = AccessTensor::scalar(6);
        let b = AccessTensor::scalar(7);
        let c = a.combine(&b, |x, y| x * y);
        assert_eq!(c, AccessTensor::scalar(42));
        assert_eq!(c.sizes(), [1, 1, 1]);
    }

    #[test]
    fn broadcast_across_directions() {
        let x = AccessTensor::from_direction(0, 4);
        let y = AccessTensor::from_direction(1, 2);
        let width = AccessTensor::scalar(100);
        let idx = y.combine(&width, |a, b| a * b).combine(&x, |a, b| a + b);
        assert_eq!(idx.sizes(), [4, 2, 1]);
        assert_eq!(idx.values(), &[0, 1, 2, 3, 100, 101, 102, 103]);
        assert_eq!(idx.get(2, 1, 0), 102);
    }

    #[test]
    fn scalar_equals_unit_extent_tensor() {
        let unit = AccessTensor::from_direction(2, 1);
        assert!(unit.is_scalar());
        let s = AccessTensor::scalar(0);
        let x = AccessTensor::from_direction(0, 3);
        assert_eq!(
            unit.combine(&x, |a, b| a + b),
            s.combine(&x, |a, b| a + b)
        );
    }

    #[test]
    fn combine_is_associative_for_commutative_ops() {
        let a = AccessTensor::from_direction(0, 4);
        let b = AccessTensor::from_direction(1, 2).combine(&AccessTensor::scalar(3), |x, y| x * y);
        let c = AccessTensor::from_direction(2, 2);
        for op in [BinaryOp::Add, BinaryOp::Mul, BinaryOp::And, BinaryOp::Or, BinaryOp::Xor] {
            let f = |x, y| eval_binary(op, x, y);
            let left = a.combine(&b.combine(&c, f), f);
            let right = a.combine(&b, f).combine(&c, f);
            assert_eq!(left, right, "{op:?}");
            assert_eq!(a.combine(&b, f), b.combine(&a, f), "{op:?}");
        }
    }

    #[test]
    fn select_per_lane() {
        let x = AccessTensor::from_direction(0, 4);
        let pred = x.combine(&AccessTensor::scalar(2), |a, b| eval_compare(CmpPredicate::Ult, a, b));
        let out = AccessTensor::select(&pred, &x, &AccessTensor::scalar(-1));
        assert_eq!(out.values(), &[0, 1, -1, -1]);
        let s = AccessTensor::select(&AccessTensor::scalar(0), &AccessTensor::scalar(1), &AccessTensor::scalar(2));
        assert_eq!(s, AccessTensor::scalar(2));
    }

    #[test]
    fn identity_warp_is_one_coalesced_line() {
        let x = AccessTensor::from_direction(0, 32);
        let acc = x.mem_accesses(32, 4, 128);
        assert!(acc.fully_coalesced);
        assert_eq!(acc.distinct_lines().len(), 1);
        assert_eq!(acc.lines, vec![0]);
    }

    #[test]
    fn small_lines_split_per_warp() {
        let x = AccessTensor::from_direction(0, 32);
        let acc = x.mem_accesses(16, 4, 32);
        // Two warps of 16 lanes, each covering 64 bytes = two lines.
        assert_eq!(acc.lines, vec![0, 32, 64, 96]);
        assert!(acc.fully_coalesced);
        assert_eq!(acc.duplicates(), 0);
    }

    #[test]
    fn strided_access_is_not_coalesced() {
        let x = AccessTensor::from_direction(0, 8);
        let strided = x.combine(&AccessTensor::scalar(2), |a, b| a * b);
        let acc = strided.mem_accesses(32, 4, 32);
        assert!(!acc.fully_coalesced);
        assert_eq!(acc.lines, vec![0, 32]);
    }

    #[test]
    fn uniform_access_touches_one_line_per_warp() {
        let x = AccessTensor::from_direction(0, 64);
        let zero = x.combine(&AccessTensor::scalar(0), |a, b| a * b);
        let acc = zero.mem_accesses(32, 4, 32);
        assert_eq!(acc.lines, vec![0, 0]);
        assert_eq!(acc.duplicates(), 1);
    }

    #[test]
    fn arithmetic_edge_cases() {
        assert_eq!(eval_binary(BinaryOp::UDiv, 7, 0), 0);
        assert_eq!(eval_binary(BinaryOp::SRem, 7, 0), 0);
        assert_eq!(eval_binary(BinaryOp::Add, i64::MAX, 1), i64::MIN);
        assert_eq!(eval_binary(BinaryOp::Shl, 1, 65), 2);
        assert_eq!(eval_binary(BinaryOp::LShr, -1, 63), 1);
        assert_eq!(eval_compare(CmpPredicate::Ult, -1, 0), 0);
        assert_eq!(eval_compare(CmpPredicate::Slt, -1, 0), 1);
        assert_eq!(AccessTensor::from_size(&[32, 2, 2]), AccessTensor::scalar(128));
    }
}

// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The reduction engine: `sum`/`mean`/`max`/`min`/`argmax`/`argmin`, each
//! either over the whole array (producing a size-1 array) or over one axis
//! (optionally keeping that axis as a size-1 dimension).
//!
//! Summation uses the same eightfold-unrolled accumulation as `ndarray`'s
//! `numeric_util::unrolled_fold`, which matters for floats: a plain
//! sequential running sum accumulates rounding error proportional to `n`,
//! while splitting into independent partial sums and combining them at the
//! end keeps the error close to `log n` (pairwise summation).

use crate::array::{Array, Context};
use crate::dtype::Dtype;
use crate::error::{NumcError, Result};
use crate::shape::ShapeVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
    ArgMax,
    ArgMin,
}

impl ReduceOp {
    /// The dtype a reduction of this kind produces: `Sum`/`Max`/`Min`
    /// preserve the input dtype, `Mean` always widens to `f64` (an integer
    /// mean is rarely an integer), and the two index-producing reductions
    /// always report `i64`.
    fn output_dtype(self, input: Dtype) -> Dtype {
        match self {
            ReduceOp::Sum | ReduceOp::Max | ReduceOp::Min => input,
            ReduceOp::Mean => Dtype::F64,
            ReduceOp::ArgMax | ReduceOp::ArgMin => Dtype::I64,
        }
    }
}

/// Eightfold-unrolled accumulation over a contiguous run, matching
/// `ndarray`'s `numeric_util::unrolled_fold` lane structure. `f` both folds
/// an element into an accumulator and combines two partial accumulators
/// (sum/max/min are all associative enough for that to be the same
/// operation), so only one closure is needed.
fn unrolled_fold<T: Copy>(mut xs: &[T], init: T, f: impl Fn(T, T) -> T) -> T {
    let (mut p0, mut p1, mut p2, mut p3, mut p4, mut p5, mut p6, mut p7) = (init, init, init, init, init, init, init, init);
    while xs.len() >= 8 {
        p0 = f(p0, xs[0]);
        p1 = f(p1, xs[1]);
        p2 = f(p2, xs[2]);
        p3 = f(p3, xs[3]);
        p4 = f(p4, xs[4]);
        p5 = f(p5, xs[5]);
        p6 = f(p6, xs[6]);
        p7 = f(p7, xs[7]);
        xs = &xs[8..];
    }
    let mut acc = init;
    acc = f(acc, f(p0, p4));
    acc = f(acc, f(p1, p5));
    acc = f(acc, f(p2, p6));
    acc = f(acc, f(p3, p7));
    for &x in xs {
        acc = f(acc, x);
    }
    acc
}

/// Recursively walk a strided lane in C order, folding every element
/// through `step`. Used both for "reduce everything" (lane = the whole
/// array) and for "reduce this one axis" (lane = a single dimension,
/// called once per position of every other axis).
fn fold_lane<T: Copy>(shape: &[isize], strides: &[isize], ptr: *const u8, acc: T, step: &impl Fn(T, T) -> T) -> T {
    if shape.is_empty() {
        return acc;
    }
    if shape.len() == 1 {
        let n = shape[0] as usize;
        let s = strides[0];
        if s == std::mem::size_of::<T>() as isize {
            let slice = unsafe { std::slice::from_raw_parts(ptr as *const T, n) };
            return unrolled_fold(slice, acc, step);
        }
        let mut a = acc;
        for i in 0..shape[0] {
            let v = unsafe { *(ptr.offset(i * s) as *const T) };
            a = step(a, v);
        }
        return a;
    }
    let mut a = acc;
    for i in 0..shape[0] {
        let sub_ptr = unsafe { ptr.offset(i * strides[0]) };
        a = fold_lane(&shape[1..], &strides[1..], sub_ptr, a, step);
    }
    a
}

/// Same traversal as [`fold_lane`] but threading a running flat index
/// alongside each element, for argmax/argmin's "smallest index wins ties".
fn fold_lane_indexed<T: Copy, Acc: Copy>(shape: &[isize], strides: &[isize], ptr: *const u8, acc: Acc, idx: &mut usize, step: &impl Fn(Acc, T, usize) -> Acc) -> Acc {
    if shape.is_empty() {
        return acc;
    }
    if shape.len() == 1 {
        let mut a = acc;
        let s = strides[0];
        for i in 0..shape[0] {
            let v = unsafe { *(ptr.offset(i * s) as *const T) };
            a = step(a, v, *idx);
            *idx += 1;
        }
        return a;
    }
    let mut a = acc;
    for i in 0..shape[0] {
        let sub_ptr = unsafe { ptr.offset(i * strides[0]) };
        a = fold_lane_indexed(&shape[1..], &strides[1..], sub_ptr, a, idx, step);
    }
    a
}

fn outer_shape_and_strides(shape: &[isize], strides: &[isize], axis: usize) -> (Vec<isize>, Vec<isize>) {
    let mut s = Vec::with_capacity(shape.len() - 1);
    let mut st = Vec::with_capacity(shape.len() - 1);
    for i in 0..shape.len() {
        if i != axis {
            s.push(shape[i]);
            st.push(strides[i]);
        }
    }
    (s, st)
}

/// Recursively walk the "outer" axes (everything but the reduced axis),
/// invoking `visit` with the lane's base pointer and matching output
/// pointer at every outer coordinate.
fn walk_outer(outer_shape: &[isize], outer_a_strides: &[isize], outer_out_strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8, visit: &impl Fn(*const u8, *mut u8)) {
    if outer_shape.is_empty() {
        visit(a_ptr, out_ptr);
        return;
    }
    for i in 0..outer_shape[0] {
        let a_sub = unsafe { a_ptr.offset(i * outer_a_strides[0]) };
        let out_sub = unsafe { out_ptr.offset(i * outer_out_strides[0]) };
        walk_outer(&outer_shape[1..], &outer_a_strides[1..], &outer_out_strides[1..], a_sub, out_sub, visit);
    }
}

macro_rules! sum_impl {
    ($t:ty, $shape:expr, $strides:expr, $ptr:expr) => {{
        let total: $t = fold_lane::<$t>($shape, $strides, $ptr, 0 as $t, &|a, b| a + b);
        total
    }};
}

macro_rules! minmax_impl {
    ($t:ty, $shape:expr, $strides:expr, $ptr:expr, $take_max:expr) => {{
        let n: usize = $shape.iter().map(|&d| d as usize).product();
        debug_assert!(n > 0);
        let first = unsafe { *($ptr as *const $t) };
        fold_lane::<$t>($shape, $strides, $ptr, first, &|a: $t, b: $t| if $take_max { if b > a { b } else { a } } else { if b < a { b } else { a } })
    }};
}

fn lane_total(shape: &[isize]) -> usize {
    shape.iter().map(|&d| d.max(0) as usize).product()
}

/// Run one reduction over `a`, either over the whole array (`axis = None`)
/// or over a single axis, optionally keeping it as a size-1 dimension.
pub fn reduce<'ctx>(ctx: &'ctx Context, a: &Array<'_>, op: ReduceOp, axis: Option<usize>, keepdim: bool) -> Result<Array<'ctx>> {
    if let Some(ax) = axis {
        if ax >= a.ndim() {
            return Err(NumcError::Axis);
        }
    }

    let empty = match axis {
        Some(ax) => a.shape()[ax] == 0,
        None => a.size() == 0,
    };
    if empty {
        // An empty lane has no identity element consistent across
        // sum/mean/max/min/argmax/argmin, so all six report the same error
        // rather than only some of them silently returning a placeholder.
        return Err(NumcError::Invalid);
    }

    let out_dtype = op.output_dtype(a.dtype());
    let out_shape_isize: ShapeVec = match axis {
        None => ShapeVec::from_slice(&[1]),
        Some(ax) => {
            let mut v: Vec<isize> = a.shape().to_vec();
            if keepdim {
                v[ax] = 1;
            } else {
                v.remove(ax);
            }
            if v.is_empty() {
                v.push(1);
            }
            ShapeVec::from_slice(&v)
        }
    };
    let out_shape_usize: Vec<usize> = out_shape_isize.as_slice().iter().map(|&d| d as usize).collect();
    let out = ctx.create(out_dtype, &out_shape_usize)?;

    let a_shape = a.shape().to_vec();
    let a_strides = a.strides().to_vec();
    let a_ptr = a.data() as *const u8;
    let out_ptr = out.data();

    match axis {
        None => reduce_full(op, a.dtype(), &a_shape, &a_strides, a_ptr, out_ptr),
        Some(ax) => {
            let (outer_shape, outer_a_strides) = outer_shape_and_strides(&a_shape, &a_strides, ax);
            // The output's strides already reflect `keepdim`/axis-removal
            // because `out` was allocated with the already-reduced shape;
            // for `keepdim` the reduced axis carries stride 0 in the walk
            // below so every lane position writes the same output element.
            let out_strides_full: Vec<isize> = if keepdim {
                out.strides().to_vec()
            } else {
                let mut s = out.strides().to_vec();
                s.insert(ax, 0);
                s
            };
            let (outer_out_strides, _) = outer_shape_and_strides(&out_strides_full, &out_strides_full, ax);
            let lane_shape = [a_shape[ax]];
            let lane_strides = [a_strides[ax]];
            reduce_axis(op, a.dtype(), &lane_shape, &lane_strides, &outer_shape, &outer_a_strides, &outer_out_strides, a_ptr, out_ptr);
        }
    }

    Ok(out)
}

fn reduce_full(op: ReduceOp, dtype: Dtype, shape: &[isize], strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8) {
    let n = lane_total(shape) as f64;
    macro_rules! dispatch {
        ($t:ty) => {{
            match op {
                ReduceOp::Sum => {
                    let total = sum_impl!($t, shape, strides, a_ptr);
                    unsafe { *(out_ptr as *mut $t) = total };
                }
                ReduceOp::Mean => {
                    let total = sum_impl!($t, shape, strides, a_ptr) as f64;
                    unsafe { *(out_ptr as *mut f64) = total / n };
                }
                ReduceOp::Max => {
                    let m = minmax_impl!($t, shape, strides, a_ptr, true);
                    unsafe { *(out_ptr as *mut $t) = m };
                }
                ReduceOp::Min => {
                    let m = minmax_impl!($t, shape, strides, a_ptr, false);
                    unsafe { *(out_ptr as *mut $t) = m };
                }
                ReduceOp::ArgMax | ReduceOp::ArgMin => {
                    let want_max = op == ReduceOp::ArgMax;
                    let mut idx = 0usize;
                    let first = unsafe { *(a_ptr as *const $t) };
                    let (_, best_idx) = fold_lane_indexed::<$t, ($t, usize)>(shape, strides, a_ptr, (first, 0), &mut idx, &|(best_v, best_i), v, i| {
                        let better = if want_max { v > best_v } else { v < best_v };
                        if better {
                            (v, i)
                        } else {
                            (best_v, best_i)
                        }
                    });
                    unsafe { *(out_ptr as *mut i64) = best_idx as i64 };
                }
            }
        }};
    }
    match dtype {
        Dtype::I8 => dispatch!(i8),
        Dtype::I16 => dispatch!(i16),
        Dtype::I32 => dispatch!(i32),
        Dtype::I64 => dispatch!(i64),
        Dtype::U8 => dispatch!(u8),
        Dtype::U16 => dispatch!(u16),
        Dtype::U32 => dispatch!(u32),
        Dtype::U64 => dispatch!(u64),
        Dtype::F32 => dispatch!(f32),
        Dtype::F64 => dispatch!(f64),
    }
}

#[allow(clippy::too_many_arguments)]
fn reduce_axis(op: ReduceOp, dtype: Dtype, lane_shape: &[isize], lane_strides: &[isize], outer_shape: &[isize], outer_a_strides: &[isize], outer_out_strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8) {
    let n = lane_shape[0] as f64;
    macro_rules! dispatch {
        ($t:ty) => {
            walk_outer(outer_shape, outer_a_strides, outer_out_strides, a_ptr, out_ptr, &|lane_ptr, out_elem_ptr| match op {
                ReduceOp::Sum => {
                    let total = sum_impl!($t, lane_shape, lane_strides, lane_ptr);
                    unsafe { *(out_elem_ptr as *mut $t) = total };
                }
                ReduceOp::Mean => {
                    let total = sum_impl!($t, lane_shape, lane_strides, lane_ptr) as f64;
                    unsafe { *(out_elem_ptr as *mut f64) = total / n };
                }
                ReduceOp::Max => {
                    let m = minmax_impl!($t, lane_shape, lane_strides, lane_ptr, true);
                    unsafe { *(out_elem_ptr as *mut $t) = m };
                }
                ReduceOp::Min => {
                    let m = minmax_impl!($t, lane_shape, lane_strides, lane_ptr, false);
                    unsafe { *(out_elem_ptr as *mut $t) = m };
                }
                ReduceOp::ArgMax | ReduceOp::ArgMin => {
                    let want_max = op == ReduceOp::ArgMax;
                    let mut idx = 0usize;
                    let first = unsafe { *(lane_ptr as *const $t) };
                    let (_, best_idx) = fold_lane_indexed::<$t, ($t, usize)>(lane_shape, lane_strides, lane_ptr, (first, 0), &mut idx, &|(best_v, best_i), v, i| {
                        let better = if want_max { v > best_v } else { v < best_v };
                        if better {
                            (v, i)
                        } else {
                            (best_v, best_i)
                        }
                    });
                    unsafe { *(out_elem_ptr as *mut i64) = best_idx as i64 };
                }
            })
        };
    }
    match dtype {
        Dtype::I8 => dispatch!(i8),
        Dtype::I16 => dispatch!(i16),
        Dtype::I32 => dispatch!(i32),
        Dtype::I64 => dispatch!(i64),
        Dtype::U8 => dispatch!(u8),
        Dtype::U16 => dispatch!(u16),
        Dtype::U32 => dispatch!(u32),
        Dtype::U64 => dispatch!(u64),
        Dtype::F32 => dispatch!(f32),
        Dtype::F64 => dispatch!(f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;

    fn ctx_array<'a>(ctx: &'a Context, values: &[f64]) -> Array<'a> {
        let mut arr = ctx.create(Dtype::F64, &[values.len()]).unwrap();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        arr.write(&bytes).unwrap();
        arr
    }

    #[test]
    fn full_sum_matches_expected() {
        let ctx = Context::new();
        let a = ctx_array(&ctx, &[1.0, 2.0, 3.0, 4.0]);
        let out = reduce(&ctx, &a, ReduceOp::Sum, None, false).unwrap();
        let v = unsafe { *(out.data() as *const f64) };
        assert_eq!(v, 10.0);
    }

    #[test]
    fn full_mean_divides_by_count() {
        let ctx = Context::new();
        let a = ctx_array(&ctx, &[2.0, 4.0, 6.0]);
        let out = reduce(&ctx, &a, ReduceOp::Mean, None, false).unwrap();
        let v = unsafe { *(out.data() as *const f64) };
        assert_eq!(v, 4.0);
        assert_eq!(out.dtype(), Dtype::F64);
    }

    #[test]
    fn axis_sum_2d_rows() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::F64, &[2, 3]).unwrap();
        let values = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        a.write(&bytes).unwrap();
        let out = reduce(&ctx, &a, ReduceOp::Sum, Some(1), false).unwrap();
        assert_eq!(out.shape(), &[2]);
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 2) };
        assert_eq!(s, &[6.0, 15.0]);
    }

    #[test]
    fn axis_sum_keepdim_preserves_rank() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::F64, &[2, 3]).unwrap();
        let values = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        a.write(&bytes).unwrap();
        let out = reduce(&ctx, &a, ReduceOp::Sum, Some(1), true).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
    }

    #[test]
    fn argmax_breaks_ties_toward_smallest_index() {
        let ctx = Context::new();
        let a = ctx_array(&ctx, &[3.0, 5.0, 5.0, 1.0]);
        let out = reduce(&ctx, &a, ReduceOp::ArgMax, None, false).unwrap();
        assert_eq!(out.dtype(), Dtype::I64);
        let v = unsafe { *(out.data() as *const i64) };
        assert_eq!(v, 1);
    }

    #[test]
    fn empty_reduction_is_an_error() {
        let ctx = Context::new();
        let a = ctx.create(Dtype::F64, &[0]).unwrap();
        assert!(reduce(&ctx, &a, ReduceOp::Sum, None, false).is_err());
    }

    #[test]
    fn full_sum_matches_axis_zero_sum_on_1d_input() {
        let ctx = Context::new();
        let a = ctx_array(&ctx, &[1.0, 2.0, 3.0, 4.0]);
        let full = reduce(&ctx, &a, ReduceOp::Sum, None, false).unwrap();
        let axis0 = reduce(&ctx, &a, ReduceOp::Sum, Some(0), false).unwrap();
        let fv = unsafe { *(full.data() as *const f64) };
        let av = unsafe { *(axis0.data() as *const f64) };
        assert_eq!(fv, av);
    }

    #[test]
    fn pairwise_sum_is_accurate_at_scale() {
        use approx::assert_relative_eq;
        let n = 1_000_000usize;
        let values: Vec<f64> = (0..n).map(|i| ((i % 1000) as f64) * 0.001 + 0.1).collect();
        let expected: f64 = values.iter().sum();
        let ctx = Context::new();
        let a = ctx_array(&ctx, &values);
        let out = reduce(&ctx, &a, ReduceOp::Sum, None, false).unwrap();
        let v = unsafe { *(out.data() as *const f64) };
        assert_relative_eq!(v, expected, max_relative = 1e-9);
    }
}

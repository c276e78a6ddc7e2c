// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Small-vector shape/stride storage, and the pure shape arithmetic that
//! backs the descriptor methods in `array.rs`: the contiguity predicate,
//! C-order stride computation, broadcast shape co-resolution, and the
//! adjacent-dimension collapse used by rematerialization.

use crate::error::{NumcError, Result};

/// Inline capacity for `ShapeVec`, matching `NUMC_MAX_DIMENSIONS`. Ranks
/// beyond this spill to a boxed slice rather than growing the inline case.
pub const MAX_INLINE_DIMS: usize = 8;

#[derive(Debug, Clone)]
enum Repr {
    Inline(u8, [isize; MAX_INLINE_DIMS]),
    Spilled(Box<[isize]>),
}

/// A small vector of `isize` used for both shapes (always non-negative) and
/// byte strides (signed, since a reversed slice has a negative stride).
///
/// Ranks up to `MAX_INLINE_DIMS` live inline with no allocation; higher
/// ranks spill to a boxed slice. Grounded on `ndarray`'s `IxDynRepr`
/// (`src/dimension/dynindeximpl.rs`), which uses the identical
/// inline-then-spill small-vector shape for its dynamic-rank index type.
#[derive(Debug, Clone)]
pub struct ShapeVec(Repr);

impl ShapeVec {
    pub fn from_slice(values: &[isize]) -> Self {
        if values.len() <= MAX_INLINE_DIMS {
            let mut arr = [0isize; MAX_INLINE_DIMS];
            arr[..values.len()].copy_from_slice(values);
            ShapeVec(Repr::Inline(values.len() as u8, arr))
        } else {
            ShapeVec(Repr::Spilled(values.to_vec().into_boxed_slice()))
        }
    }

    pub fn zeros(len: usize) -> Self {
        if len <= MAX_INLINE_DIMS {
            ShapeVec(Repr::Inline(len as u8, [0; MAX_INLINE_DIMS]))
        } else {
            ShapeVec(Repr::Spilled(vec![0isize; len].into_boxed_slice()))
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.0 {
            Repr::Inline(len, _) => *len as usize,
            Repr::Spilled(b) => b.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[isize] {
        match &self.0 {
            Repr::Inline(len, arr) => &arr[..*len as usize],
            Repr::Spilled(b) => b,
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [isize] {
        match &mut self.0 {
            Repr::Inline(len, arr) => &mut arr[..*len as usize],
            Repr::Spilled(b) => b,
        }
    }
}

impl std::ops::Deref for ShapeVec {
    type Target = [isize];
    #[inline]
    fn deref(&self) -> &[isize] {
        self.as_slice()
    }
}

impl std::ops::DerefMut for ShapeVec {
    #[inline]
    fn deref_mut(&mut self) -> &mut [isize] {
        self.as_mut_slice()
    }
}

impl PartialEq for ShapeVec {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// Compute C-order (row-major) byte strides for `shape`, given an element size.
///
/// `strides[ndim-1] = elem_size`, `strides[i-1] = strides[i] * shape[i]`.
pub fn c_order_strides(shape: &[isize], elem_size: usize) -> ShapeVec {
    let mut strides = ShapeVec::zeros(shape.len());
    let mut acc = elem_size as isize;
    for i in (0..shape.len()).rev() {
        strides[i] = acc;
        acc *= shape[i].max(1);
    }
    strides
}

/// The size (element count) of a shape, i.e. the product of its dimensions.
pub fn shape_size(shape: &[isize]) -> Result<usize> {
    let mut total: usize = 1;
    for &d in shape {
        if d < 0 {
            return Err(NumcError::Shape);
        }
        total = total.checked_mul(d as usize).ok_or(NumcError::Overflow)?;
    }
    Ok(total)
}

/// Do `strides` encode the canonical C-order layout for `shape`? O(ndim).
pub fn is_contiguous(shape: &[isize], strides: &[isize], elem_size: usize) -> bool {
    debug_assert_eq!(shape.len(), strides.len());
    let mut expected = elem_size as isize;
    for i in (0..shape.len()).rev() {
        let extent = shape[i];
        if extent == 0 {
            // A zero-length axis makes the whole array empty; by convention
            // an empty array is always considered contiguous (there is no
            // byte pattern to contradict it).
            return true;
        }
        if extent != 1 && strides[i] != expected {
            return false;
        }
        expected *= extent;
    }
    true
}

/// Align two shapes to the right (NumPy broadcasting), returning the
/// broadcast output shape. Errs with `Shape` on incompatible extents.
pub fn broadcast_shapes(a: &[isize], b: &[isize]) -> Result<ShapeVec> {
    let ndim = a.len().max(b.len());
    let mut out = ShapeVec::zeros(ndim);
    for i in 0..ndim {
        let da = axis_extent(a, i, ndim);
        let db = axis_extent(b, i, ndim);
        out[i] = if da == db {
            da
        } else if da == 1 {
            db
        } else if db == 1 {
            da
        } else {
            return Err(NumcError::Shape);
        };
    }
    Ok(out)
}

/// Extent of `shape`'s axis `i` when right-aligned into an `ndim`-long
/// index space (missing leading axes read as size-1 padding).
#[inline]
pub fn axis_extent(shape: &[isize], i: usize, ndim: usize) -> isize {
    let pad = ndim - shape.len();
    if i < pad {
        1
    } else {
        shape[i - pad]
    }
}

/// Virtual (possibly zero) byte stride of `strides`'s axis `i` once
/// right-aligned and broadcast against an output extent of `out_extent`.
/// A size-1 source axis broadcasting into a larger output gets a stride of
/// 0.
#[inline]
pub fn virtual_stride(shape: &[isize], strides: &[isize], i: usize, ndim: usize, out_extent: isize) -> isize {
    let pad = ndim - shape.len();
    if i < pad {
        return 0;
    }
    let extent = shape[i - pad];
    if extent == out_extent {
        strides[i - pad]
    } else {
        debug_assert_eq!(extent, 1);
        0
    }
}

/// Collapse adjacent dimensions whose strides admit merging into a single
/// dimension, i.e. `c_stride[k-1] == a_stride[i] * a_shape[i]`. This is the
/// dimension-collapse step used by rematerialization (`array::contiguous`)
/// and by the reduction engine's non-contiguous fast path. Returns
/// `(collapsed_shape, collapsed_strides)`, both shortest
/// possible while still visiting every element exactly once, in the same
/// relative (not necessarily C) order as the input axes.
pub fn collapse_dims(shape: &[isize], strides: &[isize]) -> (ShapeVec, ShapeVec) {
    if shape.is_empty() {
        return (ShapeVec::zeros(0), ShapeVec::zeros(0));
    }
    let mut out_shape: Vec<isize> = Vec::with_capacity(shape.len());
    let mut out_strides: Vec<isize> = Vec::with_capacity(shape.len());
    out_shape.push(shape[shape.len() - 1]);
    out_strides.push(strides[shape.len() - 1]);
    for i in (0..shape.len() - 1).rev() {
        let last_shape = *out_shape.last().unwrap();
        let last_stride = *out_strides.last().unwrap();
        if shape[i] == 1 {
            continue;
        }
        if last_shape == 1 {
            *out_shape.last_mut().unwrap() = shape[i];
            *out_strides.last_mut().unwrap() = strides[i];
            continue;
        }
        if strides[i] == last_stride * last_shape {
            *out_shape.last_mut().unwrap() = last_shape * shape[i];
        } else {
            out_shape.push(shape[i]);
            out_strides.push(strides[i]);
        }
    }
    out_shape.reverse();
    out_strides.reverse();
    (ShapeVec::from_slice(&out_shape), ShapeVec::from_slice(&out_strides))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_order_strides_basic() {
        let strides = c_order_strides(&[2, 3], 4);
        assert_eq!(strides.as_slice(), &[12, 4]);
    }

    #[test]
    fn contiguous_predicate_detects_c_order() {
        let shape = [2isize, 3];
        let strides = c_order_strides(&shape, 4);
        assert!(is_contiguous(&shape, &strides, 4));
        let bad_strides = [4isize, 4];
        assert!(!is_contiguous(&shape, &bad_strides, 4));
    }

    #[test]
    fn broadcast_shapes_prefix_and_suffix() {
        let out = broadcast_shapes(&[1], &[5]).unwrap();
        assert_eq!(out.as_slice(), &[5]);
        let out = broadcast_shapes(&[3, 1], &[1, 4]).unwrap();
        assert_eq!(out.as_slice(), &[3, 4]);
        assert!(broadcast_shapes(&[3], &[4]).is_err());
    }

    #[test]
    fn collapse_dims_merges_contiguous_axes() {
        let shape = [2isize, 3, 4];
        let strides = c_order_strides(&shape, 1);
        let (cshape, cstrides) = collapse_dims(&shape, &strides);
        assert_eq!(cshape.as_slice(), &[24]);
        assert_eq!(cstrides.as_slice(), &[1]);
    }

    #[test]
    fn collapse_dims_keeps_noncontiguous_axes_separate() {
        // a transposed (2,3) array: shape (3,2), strides (4,12) with elem 4
        let shape = [3isize, 2];
        let strides = [4isize, 12];
        let (cshape, cstrides) = collapse_dims(&shape, &strides);
        assert_eq!(cshape.as_slice(), &[3, 2]);
        assert_eq!(cstrides.as_slice(), &[4, 12]);
    }

    use quickcheck::{quickcheck, TestResult};

    quickcheck! {
        // The strides `c_order_strides` computes for any shape are, by
        // construction, the canonical C-order layout, so `is_contiguous`
        // must recognize them as contiguous for every rank/extent
        // combination, not just the fixed examples above.
        fn c_order_strides_are_always_contiguous(dims: Vec<u8>) -> TestResult {
            if dims.is_empty() || dims.len() > 6 {
                return TestResult::discard();
            }
            let shape: Vec<isize> = dims.iter().map(|&d| (d % 5) as isize + 1).collect();
            let strides = c_order_strides(&shape, 4);
            TestResult::from_bool(is_contiguous(&shape, strides.as_slice(), 4))
        }
    }
}

// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outer iteration over an operation's logical shape: broadcasting via
//! virtual zero-strides, axis sorting for locality, recursive descent down
//! to the kernel's innermost dimension, and the byte-volume-gated
//! parallel-for.

use rayon::prelude::*;

use crate::shape::virtual_stride;

/// Above this many total bytes touched, the outer loop is split across
/// worker threads in a static chunked schedule.
pub const PARALLEL_BYTE_THRESHOLD: usize = 1 << 20;

/// Bytes of work assigned to each worker thread once the threshold is
/// crossed; thread count is `volume / BYTES_PER_THREAD`, clamped to >= 1.
const BYTES_PER_THREAD: usize = 1 << 20;

fn thread_count_for(volume_bytes: usize) -> usize {
    if volume_bytes <= PARALLEL_BYTE_THRESHOLD {
        1
    } else {
        (volume_bytes / BYTES_PER_THREAD).max(1)
    }
}

/// A raw pointer wrapper that is unconditionally `Send`/`Sync`.
///
/// Safe to use here because the static chunked schedule partitions the
/// outermost axis into disjoint, non-overlapping byte ranges before handing
/// one sub-range to each worker — the aliasing rule the caller must uphold
/// is "no two chunks touch the same bytes", exactly the contract the
/// recursive walk's axis-0 split provides. Grounded on `ndarray`'s
/// `SendProducer` (`src/parallel/send_producer.rs`), which exists for the
/// identical reason.
#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

type InnerBinary = dyn Fn(*const u8, *const u8, *mut u8, usize, isize, isize, isize) + Sync;
type InnerUnary = dyn Fn(*const u8, *mut u8, usize, isize, isize) + Sync;

/// Stable insertion sort of axis indices by descending combined stride
/// magnitude, putting the smallest-stride axis innermost. `ndim` is small
/// (<= 8 for the common case), so
/// insertion sort is the right tool, matching `ndarray`'s own choice for
/// small fixed-size axis permutations.
fn sorted_axes(keys: &[isize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    for i in 1..order.len() {
        let mut j = i;
        while j > 0 && keys[order[j - 1]] < keys[order[j]] {
            order.swap(j - 1, j);
            j -= 1;
        }
    }
    order
}

fn permute(values: &[isize], order: &[usize]) -> Vec<isize> {
    order.iter().map(|&i| values[i]).collect()
}

/// Compute the broadcast output shape's per-axis virtual strides for an
/// operand whose own shape/strides may have fewer dimensions or size-1
/// axes.
fn virtual_strides(operand_shape: &[isize], operand_strides: &[isize], out_shape: &[isize]) -> Vec<isize> {
    let ndim = out_shape.len();
    (0..ndim)
        .map(|i| virtual_stride(operand_shape, operand_strides, i, ndim, out_shape[i]))
        .collect()
}

#[allow(clippy::too_many_arguments)]
unsafe fn walk_binary(level: usize, shape: &[isize], sa: &[isize], sb: &[isize], so: &[isize], a: *const u8, b: *const u8, out: *mut u8, kernel: &InnerBinary) {
    if level == shape.len() - 1 {
        kernel(a, b, out, shape[level] as usize, sa[level], sb[level], so[level]);
        return;
    }
    for i in 0..shape[level] {
        walk_binary(level + 1, shape, sa, sb, so, a.offset(i * sa[level]), b.offset(i * sb[level]), out.offset(i * so[level]), kernel);
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn walk_unary(level: usize, shape: &[isize], sa: &[isize], so: &[isize], a: *const u8, out: *mut u8, kernel: &InnerUnary) {
    if level == shape.len() - 1 {
        kernel(a, out, shape[level] as usize, sa[level], so[level]);
        return;
    }
    for i in 0..shape[level] {
        walk_unary(level + 1, shape, sa, so, a.offset(i * sa[level]), out.offset(i * so[level]), kernel);
    }
}

/// Drive a binary operation's recursive outer iteration over `out_shape`,
/// broadcasting `a`/`b` against it, with axis sorting and the parallel
/// gate applied once at this call site rather than inside the kernel.
///
/// # Safety
/// Pointers must be valid for every offset the shapes/strides can produce.
#[allow(clippy::too_many_arguments)]
pub unsafe fn binary_outer_iterate(
    out_shape: &[isize],
    a_shape: &[isize],
    a_strides: &[isize],
    b_shape: &[isize],
    b_strides: &[isize],
    out_strides: &[isize],
    elem_size: usize,
    a_ptr: *const u8,
    b_ptr: *const u8,
    out_ptr: *mut u8,
    kernel: &InnerBinary,
) {
    let sa = virtual_strides(a_shape, a_strides, out_shape);
    let sb = virtual_strides(b_shape, b_strides, out_shape);
    let so = out_strides.to_vec();

    let total: usize = out_shape.iter().map(|&d| d.max(0) as usize).product();
    if total == 0 {
        return;
    }

    let keys: Vec<isize> = (0..out_shape.len()).map(|i| sa[i] + sb[i] + so[i]).collect();
    let order = sorted_axes(&keys);
    let shape = permute(out_shape, &order);
    let sa = permute(&sa, &order);
    let sb = permute(&sb, &order);
    let so = permute(&so, &order);

    let volume = total * elem_size;
    let nthreads = thread_count_for(volume);
    if nthreads <= 1 || shape[0] <= 1 {
        walk_binary(0, &shape, &sa, &sb, &so, a_ptr, b_ptr, out_ptr, kernel);
        return;
    }

    let n0 = shape[0] as usize;
    let chunk = (n0 + nthreads - 1) / nthreads;
    let a_send = SendPtr(a_ptr as *mut u8);
    let b_send = SendPtr(b_ptr as *mut u8);
    let out_send = SendPtr(out_ptr);
    (0..n0).into_par_iter().step_by(chunk).for_each(move |start| {
        let (a_send, b_send, out_send) = (a_send, b_send, out_send);
        let end = (start + chunk).min(n0);
        let a0 = unsafe { a_send.0.offset(start as isize * sa[0]) } as *const u8;
        let b0 = unsafe { b_send.0.offset(start as isize * sb[0]) } as *const u8;
        let o0 = unsafe { out_send.0.offset(start as isize * so[0]) };
        for i in 0..(end - start) {
            unsafe {
                walk_binary(1, &shape, &sa, &sb, &so, a0.offset(i as isize * sa[0]), b0.offset(i as isize * sb[0]), o0.offset(i as isize * so[0]), kernel);
            }
        }
    });
}

/// Unary counterpart of [`binary_outer_iterate`]: no broadcasting operand,
/// just `a` against `out`'s matching shape.
///
/// # Safety
/// Same pointer validity requirements as [`binary_outer_iterate`].
#[allow(clippy::too_many_arguments)]
pub unsafe fn unary_outer_iterate(shape: &[isize], a_strides: &[isize], out_strides: &[isize], elem_size: usize, a_ptr: *const u8, out_ptr: *mut u8, kernel: &InnerUnary) {
    let total: usize = shape.iter().map(|&d| d.max(0) as usize).product();
    if total == 0 {
        return;
    }
    let keys: Vec<isize> = (0..shape.len()).map(|i| a_strides[i] + out_strides[i]).collect();
    let order = sorted_axes(&keys);
    let shape = permute(shape, &order);
    let sa = permute(a_strides, &order);
    let so = permute(out_strides, &order);

    let volume = total * elem_size;
    let nthreads = thread_count_for(volume);
    if nthreads <= 1 || shape[0] <= 1 {
        walk_unary(0, &shape, &sa, &so, a_ptr, out_ptr, kernel);
        return;
    }
    let n0 = shape[0] as usize;
    let chunk = (n0 + nthreads - 1) / nthreads;
    let a_send = SendPtr(a_ptr as *mut u8);
    let out_send = SendPtr(out_ptr);
    (0..n0).into_par_iter().step_by(chunk).for_each(move |start| {
        let (a_send, out_send) = (a_send, out_send);
        let end = (start + chunk).min(n0);
        let a0 = unsafe { a_send.0.offset(start as isize * sa[0]) } as *const u8;
        let o0 = unsafe { out_send.0.offset(start as isize * so[0]) };
        for i in 0..(end - start) {
            unsafe {
                walk_unary(1, &shape, &sa, &so, a0.offset(i as isize * sa[0]), o0.offset(i as isize * so[0]), kernel);
            }
        }
    });
}

/// A 1-extent-per-axis "shape" of `ndim` ones, the virtual shape a scalar
/// operand presents to the broadcast machinery: every axis broadcasts via
/// a zero stride, so scalar-right/-left operations are just the ordinary
/// broadcast path specialized to an all-ones operand shape.
pub fn scalar_shape(ndim: usize) -> Vec<isize> {
    vec![1; ndim]
}

pub fn scalar_strides(ndim: usize) -> Vec<isize> {
    vec![0; ndim]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_add_2x3() {
        let a: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b: [f32; 6] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let mut out = [0f32; 6];
        let shape = [2isize, 3];
        let strides = crate::shape::c_order_strides(&shape, 4);
        unsafe {
            binary_outer_iterate(
                &shape,
                &shape,
                strides.as_slice(),
                &shape,
                strides.as_slice(),
                strides.as_slice(),
                4,
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
                &|ap, bp, op, n, sa, sb, so| {
                    crate::kernel::pointwise::binary_kernel::<f32, _>(ap, bp, op, n, sa, sb, so, |x, y| x + y);
                },
            );
        }
        assert_eq!(out, [11.0, 22.0, 33.0, 44.0, 55.0, 66.0]);
    }

    #[test]
    fn broadcast_add_3x1_and_1x4() {
        let a: [f32; 3] = [1.0, 2.0, 3.0];
        let b: [f32; 4] = [10.0, 20.0, 30.0, 40.0];
        let mut out = [0f32; 12];
        let a_shape = [3isize, 1];
        let a_strides = crate::shape::c_order_strides(&a_shape, 4);
        let b_shape = [1isize, 4];
        let b_strides = crate::shape::c_order_strides(&b_shape, 4);
        let out_shape = [3isize, 4];
        let out_strides = crate::shape::c_order_strides(&out_shape, 4);
        unsafe {
            binary_outer_iterate(
                &out_shape,
                &a_shape,
                a_strides.as_slice(),
                &b_shape,
                b_strides.as_slice(),
                out_strides.as_slice(),
                4,
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
                &|ap, bp, op, n, sa, sb, so| {
                    crate::kernel::pointwise::binary_kernel::<f32, _>(ap, bp, op, n, sa, sb, so, |x, y| x + y);
                },
            );
        }
        assert_eq!(out, [11.0, 21.0, 31.0, 41.0, 12.0, 22.0, 32.0, 42.0, 13.0, 23.0, 33.0, 43.0]);
    }
}

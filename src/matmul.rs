// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A naive 2-D matrix multiply kernel.
//!
//! No microkernel, no blocking, no BLAS: an `i, k, j` triple loop per
//! dtype, dispatched through a `[fn; 10]` table the same shape as
//! `kernel::dispatch`'s. The `i, k, j` loop order (rather than the more
//! obvious `i, j, k`) keeps the innermost `j` loop walking both the output
//! row and the right-hand row contiguously, which is the one locality
//! property worth keeping even in a kernel this simple.
//!
//! Narrow integer dtypes accumulate in a wider type and narrow once at the
//! end, so a row of modest products doesn't wrap silently partway through
//! the reduction the way accumulating directly in `i8`/`i16`/`u8`/`u16`
//! would.

use rayon::prelude::*;

use crate::array::{Array, Context};
use crate::dtype::Dtype;
use crate::error::{NumcError, Result};
use crate::kernel::iterate::PARALLEL_BYTE_THRESHOLD;

/// Above this many output bytes, the outer `i` loop is split across worker
/// threads (mirrors the element-wise engine's gate, `kernel::iterate`).
const PARALLEL_THRESHOLD: usize = PARALLEL_BYTE_THRESHOLD;

#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

macro_rules! matmul_narrow {
    ($name:ident, $t:ty, $acc:ty) => {
        #[allow(clippy::too_many_arguments)]
        fn $name(m: usize, k: usize, n: usize, a: &[$t], a_row_stride: usize, b: &[$t], b_row_stride: usize, c: &mut [$t], c_row_stride: usize) {
            for i in 0..m {
                let out_row = &mut c[i * c_row_stride..i * c_row_stride + n];
                let mut acc = vec![0 as $acc; n];
                for kk in 0..k {
                    let a_ik = a[i * a_row_stride + kk] as $acc;
                    if a_ik == 0 {
                        continue;
                    }
                    let b_row = &b[kk * b_row_stride..kk * b_row_stride + n];
                    for j in 0..n {
                        acc[j] = acc[j].wrapping_add(a_ik.wrapping_mul(b_row[j] as $acc));
                    }
                }
                for j in 0..n {
                    out_row[j] = acc[j] as $t;
                }
            }
        }
    };
}

matmul_narrow!(matmul_i8, i8, i32);
matmul_narrow!(matmul_i16, i16, i32);
matmul_narrow!(matmul_u8, u8, u32);
matmul_narrow!(matmul_u16, u16, u32);

macro_rules! matmul_native {
    ($name:ident, $t:ty) => {
        #[allow(clippy::too_many_arguments)]
        fn $name(m: usize, k: usize, n: usize, a: &[$t], a_row_stride: usize, b: &[$t], b_row_stride: usize, c: &mut [$t], c_row_stride: usize) {
            for i in 0..m {
                let out_row = &mut c[i * c_row_stride..i * c_row_stride + n];
                for v in out_row.iter_mut() {
                    *v = 0 as $t;
                }
                for kk in 0..k {
                    let a_ik = a[i * a_row_stride + kk];
                    let b_row = &b[kk * b_row_stride..kk * b_row_stride + n];
                    for j in 0..n {
                        out_row[j] += a_ik * b_row[j];
                    }
                }
            }
        }
    };
}

matmul_native!(matmul_i32, i32);
matmul_native!(matmul_i64, i64);
matmul_native!(matmul_u32, u32);
matmul_native!(matmul_u64, u64);
matmul_native!(matmul_f32, f32);
matmul_native!(matmul_f64, f64);

/// Naive `a (m x k) @ b (k x n) -> out (m x n)` over contiguous row-major
/// buffers, dispatched by dtype, parallelized over row blocks of `a`/`out`
/// once the output exceeds [`PARALLEL_THRESHOLD`] bytes.
///
/// # Safety
/// `a`, `b`, `out` must each point to at least `m*k`, `k*n`, `m*n` elements
/// of the same dtype, with the stated row strides (in elements).
#[allow(clippy::too_many_arguments)]
unsafe fn matmul_dispatch(dtype: Dtype, m: usize, k: usize, n: usize, a_ptr: *const u8, a_row_stride: usize, b_ptr: *const u8, b_row_stride: usize, out_ptr: *mut u8, out_row_stride: usize) {
    let volume = m * n * dtype.size();
    let nthreads = if volume <= PARALLEL_THRESHOLD { 1 } else { (volume / PARALLEL_THRESHOLD).max(1).min(m.max(1)) };

    macro_rules! run {
        ($t:ty, $f:path) => {{
            let a: &[$t] = std::slice::from_raw_parts(a_ptr as *const $t, m * a_row_stride);
            let b: &[$t] = std::slice::from_raw_parts(b_ptr as *const $t, k * b_row_stride);
            if nthreads <= 1 {
                let c: &mut [$t] = std::slice::from_raw_parts_mut(out_ptr as *mut $t, m * out_row_stride);
                $f(m, k, n, a, a_row_stride, b, b_row_stride, c, out_row_stride);
            } else {
                let chunk = (m + nthreads - 1) / nthreads;
                let out_send = SendPtr(out_ptr as *mut $t);
                (0..m).into_par_iter().step_by(chunk).for_each(move |start| {
                    let out_send = out_send;
                    let rows = (m - start).min(chunk);
                    let a_sub = &a[start * a_row_stride..];
                    let c_sub = unsafe { std::slice::from_raw_parts_mut(out_send.0.add(start * out_row_stride), rows * out_row_stride) };
                    $f(rows, k, n, a_sub, a_row_stride, b, b_row_stride, c_sub, out_row_stride);
                });
            }
        }};
    }

    match dtype {
        Dtype::I8 => run!(i8, matmul_i8),
        Dtype::I16 => run!(i16, matmul_i16),
        Dtype::I32 => run!(i32, matmul_i32),
        Dtype::I64 => run!(i64, matmul_i64),
        Dtype::U8 => run!(u8, matmul_u8),
        Dtype::U16 => run!(u16, matmul_u16),
        Dtype::U32 => run!(u32, matmul_u32),
        Dtype::U64 => run!(u64, matmul_u64),
        Dtype::F32 => run!(f32, matmul_f32),
        Dtype::F64 => run!(f64, matmul_f64),
    }
}

/// `a @ b`: both operands must be 2-D, contiguous, share a dtype, and have
/// compatible inner dimensions (`a.shape[1] == b.shape[0]`).
pub fn matmul<'ctx>(ctx: &'ctx Context, a: &Array<'_>, b: &Array<'_>) -> Result<Array<'ctx>> {
    if a.ndim() != 2 || b.ndim() != 2 {
        return Err(NumcError::Shape);
    }
    if a.dtype() != b.dtype() {
        return Err(NumcError::Type);
    }
    if !a.is_contiguous() || !b.is_contiguous() {
        return Err(NumcError::Contiguous);
    }
    let (m, k) = (a.shape()[0] as usize, a.shape()[1] as usize);
    let (k2, n) = (b.shape()[0] as usize, b.shape()[1] as usize);
    if k != k2 {
        return Err(NumcError::Shape);
    }

    let out = ctx.create(a.dtype(), &[m, n])?;
    unsafe {
        matmul_dispatch(a.dtype(), m, k, n, a.data() as *const u8, k, b.data() as *const u8, n, out.data(), n);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_array<'a>(ctx: &'a Context, shape: &[usize], values: &[f64]) -> Array<'a> {
        let mut arr = ctx.create(Dtype::F64, shape).unwrap();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        arr.write(&bytes).unwrap();
        arr
    }

    #[test]
    fn small_2x2_matmul() {
        let ctx = Context::new();
        let a = f64_array(&ctx, &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = f64_array(&ctx, &[2, 2], &[5.0, 6.0, 7.0, 8.0]);
        let out = matmul(&ctx, &a, &b).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 4) };
        assert_eq!(s, &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn rectangular_matmul() {
        let ctx = Context::new();
        let a = f64_array(&ctx, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = f64_array(&ctx, &[3, 2], &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let out = matmul(&ctx, &a, &b).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 4) };
        assert_eq!(s, &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn identity_matmul_is_a_no_op() {
        let ctx = Context::new();
        let a = f64_array(&ctx, &[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let b = f64_array(&ctx, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = matmul(&ctx, &a, &b).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 6) };
        assert_eq!(s, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let c = f64_array(&ctx, &[3, 3], &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let out2 = matmul(&ctx, &b, &c).unwrap();
        let s2 = unsafe { std::slice::from_raw_parts(out2.data() as *const f64, 6) };
        assert_eq!(s2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn narrow_int_matmul_uses_wide_accumulator() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::I8, &[1, 2]).unwrap();
        a.write(&[100i8 as u8, 100i8 as u8]).unwrap();
        let mut b = ctx.create(Dtype::I8, &[2, 1]).unwrap();
        b.write(&[100i8 as u8, 100i8 as u8]).unwrap();
        let out = matmul(&ctx, &a, &b).unwrap();
        let v = unsafe { *(out.data() as *const i8) };
        // 100*100 + 100*100 = 20000, wraps to i8 only at the final narrow,
        // not partway through accumulation.
        assert_eq!(v, (20000i32 as i8));
    }

    #[test]
    fn dim_mismatch_is_an_error() {
        let ctx = Context::new();
        let a = f64_array(&ctx, &[2, 3], &[0.0; 6]);
        let b = f64_array(&ctx, &[4, 2], &[0.0; 8]);
        assert!(matmul(&ctx, &a, &b).is_err());
    }
}

// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The public operation surface: binary (broadcasting), unary, and
//! scalar-right element-wise operations, each validating dtype/shape
//! compatibility before handing off to the kernel dispatch tables.
//!
//! Scalar operations reuse the binary dispatch path entirely: a scalar
//! operand is presented to the broadcast machinery as a virtual
//! all-ones-shape, all-zero-stride operand (`kernel::iterate::scalar_shape`/
//! `scalar_strides`), so there is exactly one code path for "both operands
//! vary" and "one operand is a single value" rather than two.

use crate::array::{Array, Context};
use crate::dtype::{Dtype, Scalar};
use crate::error::{NumcError, Result};
use crate::kernel::dispatch::{dispatch_binary, dispatch_unary, BinaryOp, UnaryOp};
use crate::kernel::iterate::{scalar_shape, scalar_strides};
use crate::shape::broadcast_shapes;

fn check_same_dtype(a: Dtype, b: Dtype) -> Result<()> {
    if a != b {
        return Err(NumcError::Type);
    }
    Ok(())
}

/// `out = a <op> b`, broadcasting `a` and `b` to a common shape.
pub fn binary<'ctx>(ctx: &'ctx Context, op: BinaryOp, a: &Array<'_>, b: &Array<'_>) -> Result<Array<'ctx>> {
    check_same_dtype(a.dtype(), b.dtype())?;
    let out_shape = broadcast_shapes(a.shape(), b.shape())?;
    let out_shape_usize: Vec<usize> = out_shape.as_slice().iter().map(|&d| d as usize).collect();
    let out = ctx.create(a.dtype(), &out_shape_usize)?;
    unsafe {
        dispatch_binary(
            op,
            a.dtype(),
            out_shape.as_slice(),
            a.shape(),
            a.strides(),
            b.shape(),
            b.strides(),
            out.strides(),
            a.data() as *const u8,
            b.data() as *const u8,
            out.data(),
        );
    }
    Ok(out)
}

/// `a <op>= b` in place: `a`'s shape is the output shape, so `b` must
/// broadcast *into* `a` (not the other way around) and the dtypes must
/// already match.
pub fn binary_inplace(op: BinaryOp, a: &mut Array<'_>, b: &Array<'_>) -> Result<()> {
    check_same_dtype(a.dtype(), b.dtype())?;
    let broadcast = broadcast_shapes(a.shape(), b.shape())?;
    if broadcast.as_slice() != a.shape() {
        return Err(NumcError::Shape);
    }
    let a_shape = a.shape().to_vec();
    let a_strides = a.strides().to_vec();
    let dtype = a.dtype();
    let a_ptr = a.data();
    unsafe {
        dispatch_binary(op, dtype, &a_shape, &a_shape, &a_strides, b.shape(), b.strides(), &a_strides, a_ptr as *const u8, b.data() as *const u8, a_ptr);
    }
    Ok(())
}

/// `out = f(a)`.
pub fn unary<'ctx>(ctx: &'ctx Context, op: UnaryOp, a: &Array<'_>) -> Result<Array<'ctx>> {
    let shape_usize: Vec<usize> = a.shape().iter().map(|&d| d as usize).collect();
    let out = ctx.create(a.dtype(), &shape_usize)?;
    unsafe {
        dispatch_unary(op, a.dtype(), a.shape(), a.strides(), out.strides(), a.data() as *const u8, out.data());
    }
    Ok(out)
}

pub fn unary_inplace(op: UnaryOp, a: &mut Array<'_>) -> Result<()> {
    let shape = a.shape().to_vec();
    let strides = a.strides().to_vec();
    let dtype = a.dtype();
    let ptr = a.data();
    unsafe {
        dispatch_unary(op, dtype, &shape, &strides, &strides, ptr as *const u8, ptr);
    }
    Ok(())
}

fn scalar_bytes(dtype: Dtype, value: Scalar) -> Result<[u8; 8]> {
    if value.dtype() != dtype {
        return Err(NumcError::Type);
    }
    let mut buf = [0u8; 8];
    value.write_bytes(&mut buf[..dtype.size()]);
    Ok(buf)
}

/// `out = a <op> scalar`, the scalar right-hand operand broadcasting over
/// every element of `a`.
pub fn scalar<'ctx>(ctx: &'ctx Context, op: BinaryOp, a: &Array<'_>, value: Scalar) -> Result<Array<'ctx>> {
    let buf = scalar_bytes(a.dtype(), value)?;
    let shape_usize: Vec<usize> = a.shape().iter().map(|&d| d as usize).collect();
    let out = ctx.create(a.dtype(), &shape_usize)?;
    let ndim = a.ndim();
    let b_shape = scalar_shape(ndim);
    let b_strides = scalar_strides(ndim);
    unsafe {
        dispatch_binary(op, a.dtype(), a.shape(), a.shape(), a.strides(), &b_shape, &b_strides, out.strides(), a.data() as *const u8, buf.as_ptr(), out.data());
    }
    Ok(out)
}

pub fn scalar_inplace(op: BinaryOp, a: &mut Array<'_>, value: Scalar) -> Result<()> {
    let buf = scalar_bytes(a.dtype(), value)?;
    let shape = a.shape().to_vec();
    let strides = a.strides().to_vec();
    let dtype = a.dtype();
    let ndim = a.ndim();
    let b_shape = scalar_shape(ndim);
    let b_strides = scalar_strides(ndim);
    let ptr = a.data();
    unsafe {
        dispatch_binary(op, dtype, &shape, &shape, &strides, &b_shape, &b_strides, &strides, ptr as *const u8, buf.as_ptr(), ptr);
    }
    Ok(())
}

/// `clip(a, lo, hi)`: the one unary-shaped operation that takes two extra
/// scalar parameters, so it doesn't fit the plain `unary`/`UnaryOp` table
/// and gets its own small dispatch here instead.
pub fn clip<'ctx>(ctx: &'ctx Context, a: &Array<'_>, lo: Scalar, hi: Scalar) -> Result<Array<'ctx>> {
    use crate::kernel::mathfns as m;
    if lo.dtype() != a.dtype() || hi.dtype() != a.dtype() {
        return Err(NumcError::Type);
    }
    let shape_usize: Vec<usize> = a.shape().iter().map(|&d| d as usize).collect();
    let out = ctx.create(a.dtype(), &shape_usize)?;

    macro_rules! run {
        ($t:ty, $get:ident, $f:path) => {{
            let lo_v = lo.$get();
            let hi_v = hi.$get();
            let shape = a.shape().to_vec();
            unsafe {
                crate::kernel::iterate::unary_outer_iterate(&shape, a.strides(), out.strides(), std::mem::size_of::<$t>(), a.data() as *const u8, out.data(), &move |ap, op, n, sa, so| {
                    crate::kernel::pointwise::unary_kernel::<$t, _>(ap, op, n, sa, so, |x| $f(x, lo_v, hi_v));
                });
            }
        }};
    }
    match a.dtype() {
        Dtype::I8 => run!(i8, as_i8, m::clip_i8),
        Dtype::I16 => run!(i16, as_i16, m::clip_i16),
        Dtype::I32 => run!(i32, as_i32, m::clip_i32),
        Dtype::I64 => run!(i64, as_i64, m::clip_i64),
        Dtype::U8 => run!(u8, as_u8, m::clip_u8),
        Dtype::U16 => run!(u16, as_u16, m::clip_u16),
        Dtype::U32 => run!(u32, as_u32, m::clip_u32),
        Dtype::U64 => run!(u64, as_u64, m::clip_u64),
        Dtype::F32 => run!(f32, as_f32, m::clip_f32),
        Dtype::F64 => run!(f64, as_f64, m::clip_f64),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;

    fn arr<'a>(ctx: &'a Context, shape: &[usize], values: &[f64]) -> Array<'a> {
        let mut a = ctx.create(Dtype::F64, shape).unwrap();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        a.write(&bytes).unwrap();
        a
    }

    #[test]
    fn binary_add_same_shape() {
        let ctx = Context::new();
        let a = arr(&ctx, &[3], &[1.0, 2.0, 3.0]);
        let b = arr(&ctx, &[3], &[10.0, 20.0, 30.0]);
        let out = binary(&ctx, BinaryOp::Add, &a, &b).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 3) };
        assert_eq!(s, &[11.0, 22.0, 33.0]);
    }

    #[test]
    fn binary_broadcast_row_plus_column() {
        let ctx = Context::new();
        let a = arr(&ctx, &[3, 1], &[1.0, 2.0, 3.0]);
        let b = arr(&ctx, &[1, 2], &[10.0, 20.0]);
        let out = binary(&ctx, BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 6) };
        assert_eq!(s, &[11.0, 21.0, 12.0, 22.0, 13.0, 23.0]);
    }

    #[test]
    fn scalar_multiply() {
        let ctx = Context::new();
        let a = arr(&ctx, &[3], &[1.0, 2.0, 3.0]);
        let out = scalar(&ctx, BinaryOp::Mul, &a, Scalar::F64(2.0)).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 3) };
        assert_eq!(s, &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn unary_neg() {
        let ctx = Context::new();
        let a = arr(&ctx, &[2], &[1.0, -2.0]);
        let out = unary(&ctx, UnaryOp::Neg, &a).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 2) };
        assert_eq!(s, &[-1.0, 2.0]);
    }

    #[test]
    fn clip_clamps_into_range() {
        let ctx = Context::new();
        let a = arr(&ctx, &[3], &[-5.0, 0.5, 5.0]);
        let out = clip(&ctx, &a, Scalar::F64(0.0), Scalar::F64(1.0)).unwrap();
        let s = unsafe { std::slice::from_raw_parts(out.data() as *const f64, 3) };
        assert_eq!(s, &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn dtype_mismatch_is_an_error() {
        let ctx = Context::new();
        let a = arr(&ctx, &[2], &[1.0, 2.0]);
        let mut b = ctx.create(Dtype::I32, &[2]).unwrap();
        b.write(&1i32.to_le_bytes()).err();
        let _ = b.write(&[1, 0, 0, 0, 2, 0, 0, 0]);
        assert!(binary(&ctx, BinaryOp::Add, &a, &b).is_err());
    }

    #[test]
    fn zero_size_binary_op_is_a_successful_no_op() {
        let ctx = Context::new();
        let a = ctx.create(Dtype::F64, &[0]).unwrap();
        let b = ctx.create(Dtype::F64, &[0]).unwrap();
        let out = binary(&ctx, BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(out.size(), 0);
    }
}

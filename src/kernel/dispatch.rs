// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dispatch tables: an `(op, dtype)` pair resolves to a concrete kernel
//! call through a `[fn; 10]` table indexed by [`crate::dtype::Dtype::index`].
//! Each table entry is a thin closure around
//! [`super::pointwise::binary_kernel`]/[`super::pointwise::unary_kernel`]
//! monomorphized at one concrete element type, wired to its [`super::mathfns`]
//! body.

use crate::dtype::Dtype;
use super::iterate::{binary_outer_iterate, unary_outer_iterate};
use super::mathfns as m;
use super::pointwise::{binary_kernel, unary_kernel};

/// The binary element-wise operations. Scalar-right/-left operations
/// reuse this same table: a scalar operand
/// is just a binary operand whose shape broadcasts to 1 on every axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Maximum,
    Minimum,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Log,
    Exp,
    Sqrt,
}

/// Either kind of operation, used only for error messages/naming.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

/// # Safety
/// `a`, `b`, `out` must be valid for every offset `binary_outer_iterate`'s
/// shapes/strides can produce, and must all share the dtype this entry was
/// resolved for.
type BinaryEntry = unsafe fn(
    out_shape: &[isize],
    a_shape: &[isize],
    a_strides: &[isize],
    b_shape: &[isize],
    b_strides: &[isize],
    out_strides: &[isize],
    a_ptr: *const u8,
    b_ptr: *const u8,
    out_ptr: *mut u8,
);

type UnaryEntry = unsafe fn(shape: &[isize], a_strides: &[isize], out_strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8);

macro_rules! binary_entry {
    ($t:ty, $f:expr) => {{
        #[allow(clippy::too_many_arguments)]
        unsafe fn entry(
            out_shape: &[isize],
            a_shape: &[isize],
            a_strides: &[isize],
            b_shape: &[isize],
            b_strides: &[isize],
            out_strides: &[isize],
            a_ptr: *const u8,
            b_ptr: *const u8,
            out_ptr: *mut u8,
        ) {
            let elem_size = std::mem::size_of::<$t>();
            binary_outer_iterate(
                out_shape,
                a_shape,
                a_strides,
                b_shape,
                b_strides,
                out_strides,
                elem_size,
                a_ptr,
                b_ptr,
                out_ptr,
                &|ap, bp, op, n, sa, sb, so| binary_kernel::<$t, _>(ap, bp, op, n, sa, sb, so, $f),
            );
        }
        entry
    }};
}

macro_rules! unary_entry {
    ($t:ty, $f:expr) => {{
        unsafe fn entry(shape: &[isize], a_strides: &[isize], out_strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8) {
            let elem_size = std::mem::size_of::<$t>();
            unary_outer_iterate(shape, a_strides, out_strides, elem_size, a_ptr, out_ptr, &|ap, op, n, sa, so| unary_kernel::<$t, _>(ap, op, n, sa, so, $f));
        }
        entry
    }};
}

/// Build the 10-wide (one per [`Dtype`], in [`Dtype::index`] order) table
/// for one binary operation.
fn binary_table(op: BinaryOp) -> [BinaryEntry; 10] {
    use BinaryOp::*;
    match op {
        Add => [
            binary_entry!(i8, |a, b| a.wrapping_add(b)),
            binary_entry!(i16, |a, b| a.wrapping_add(b)),
            binary_entry!(i32, |a, b| a.wrapping_add(b)),
            binary_entry!(i64, |a, b| a.wrapping_add(b)),
            binary_entry!(u8, |a, b| a.wrapping_add(b)),
            binary_entry!(u16, |a, b| a.wrapping_add(b)),
            binary_entry!(u32, |a, b| a.wrapping_add(b)),
            binary_entry!(u64, |a, b| a.wrapping_add(b)),
            binary_entry!(f32, |a, b| a + b),
            binary_entry!(f64, |a, b| a + b),
        ],
        Sub => [
            binary_entry!(i8, |a, b| a.wrapping_sub(b)),
            binary_entry!(i16, |a, b| a.wrapping_sub(b)),
            binary_entry!(i32, |a, b| a.wrapping_sub(b)),
            binary_entry!(i64, |a, b| a.wrapping_sub(b)),
            binary_entry!(u8, |a, b| a.wrapping_sub(b)),
            binary_entry!(u16, |a, b| a.wrapping_sub(b)),
            binary_entry!(u32, |a, b| a.wrapping_sub(b)),
            binary_entry!(u64, |a, b| a.wrapping_sub(b)),
            binary_entry!(f32, |a, b| a - b),
            binary_entry!(f64, |a, b| a - b),
        ],
        Mul => [
            binary_entry!(i8, |a, b| a.wrapping_mul(b)),
            binary_entry!(i16, |a, b| a.wrapping_mul(b)),
            binary_entry!(i32, |a, b| a.wrapping_mul(b)),
            binary_entry!(i64, |a, b| a.wrapping_mul(b)),
            binary_entry!(u8, |a, b| a.wrapping_mul(b)),
            binary_entry!(u16, |a, b| a.wrapping_mul(b)),
            binary_entry!(u32, |a, b| a.wrapping_mul(b)),
            binary_entry!(u64, |a, b| a.wrapping_mul(b)),
            binary_entry!(f32, |a, b| a * b),
            binary_entry!(f64, |a, b| a * b),
        ],
        Div => [
            binary_entry!(i8, m::div_i8),
            binary_entry!(i16, m::div_i16),
            binary_entry!(i32, m::div_i32),
            binary_entry!(i64, m::div_i64),
            binary_entry!(u8, m::div_u8),
            binary_entry!(u16, m::div_u16),
            binary_entry!(u32, m::div_u32),
            binary_entry!(u64, m::div_u64),
            binary_entry!(f32, m::div_f32),
            binary_entry!(f64, m::div_f64),
        ],
        Pow => [
            binary_entry!(i8, m::pow_i8),
            binary_entry!(i16, m::pow_i16),
            binary_entry!(i32, m::pow_i32),
            binary_entry!(i64, m::pow_i64),
            binary_entry!(u8, m::pow_u8),
            binary_entry!(u16, m::pow_u16),
            binary_entry!(u32, m::pow_u32),
            binary_entry!(u64, m::pow_u64),
            binary_entry!(f32, m::pow_f32),
            binary_entry!(f64, m::pow_f64),
        ],
        Maximum => [
            binary_entry!(i8, m::maximum_i8),
            binary_entry!(i16, m::maximum_i16),
            binary_entry!(i32, m::maximum_i32),
            binary_entry!(i64, m::maximum_i64),
            binary_entry!(u8, m::maximum_u8),
            binary_entry!(u16, m::maximum_u16),
            binary_entry!(u32, m::maximum_u32),
            binary_entry!(u64, m::maximum_u64),
            binary_entry!(f32, m::maximum_f32),
            binary_entry!(f64, m::maximum_f64),
        ],
        Minimum => [
            binary_entry!(i8, m::minimum_i8),
            binary_entry!(i16, m::minimum_i16),
            binary_entry!(i32, m::minimum_i32),
            binary_entry!(i64, m::minimum_i64),
            binary_entry!(u8, m::minimum_u8),
            binary_entry!(u16, m::minimum_u16),
            binary_entry!(u32, m::minimum_u32),
            binary_entry!(u64, m::minimum_u64),
            binary_entry!(f32, m::minimum_f32),
            binary_entry!(f64, m::minimum_f64),
        ],
    }
}

fn unary_table(op: UnaryOp) -> [UnaryEntry; 10] {
    use UnaryOp::*;
    match op {
        Neg => [
            unary_entry!(i8, m::neg_i8),
            unary_entry!(i16, m::neg_i16),
            unary_entry!(i32, m::neg_i32),
            unary_entry!(i64, m::neg_i64),
            unary_entry!(u8, m::neg_u8),
            unary_entry!(u16, m::neg_u16),
            unary_entry!(u32, m::neg_u32),
            unary_entry!(u64, m::neg_u64),
            unary_entry!(f32, m::neg_f32),
            unary_entry!(f64, m::neg_f64),
        ],
        Abs => [
            unary_entry!(i8, m::abs_i8),
            unary_entry!(i16, m::abs_i16),
            unary_entry!(i32, m::abs_i32),
            unary_entry!(i64, m::abs_i64),
            unary_entry!(u8, m::abs_u8),
            unary_entry!(u16, m::abs_u16),
            unary_entry!(u32, m::abs_u32),
            unary_entry!(u64, m::abs_u64),
            unary_entry!(f32, m::abs_f32),
            unary_entry!(f64, m::abs_f64),
        ],
        Log => [
            unary_entry!(i8, m::log_i8),
            unary_entry!(i16, m::log_i16),
            unary_entry!(i32, m::log_i32),
            unary_entry!(i64, m::log_i64),
            unary_entry!(u8, m::log_u8),
            unary_entry!(u16, m::log_u16),
            unary_entry!(u32, m::log_u32),
            unary_entry!(u64, m::log_u64),
            unary_entry!(f32, m::log_f32),
            unary_entry!(f64, m::log_f64),
        ],
        Exp => [
            unary_entry!(i8, m::exp_i8),
            unary_entry!(i16, m::exp_i16),
            unary_entry!(i32, m::exp_i32),
            unary_entry!(i64, m::exp_i64),
            unary_entry!(u8, m::exp_u8),
            unary_entry!(u16, m::exp_u16),
            unary_entry!(u32, m::exp_u32),
            unary_entry!(u64, m::exp_u64),
            unary_entry!(f32, m::exp_f32),
            unary_entry!(f64, m::exp_f64),
        ],
        Sqrt => [
            unary_entry!(i8, m::sqrt_i8),
            unary_entry!(i16, m::sqrt_i16),
            unary_entry!(i32, m::sqrt_i32),
            unary_entry!(i64, m::sqrt_i64),
            unary_entry!(u8, m::sqrt_u8),
            unary_entry!(u16, m::sqrt_u16),
            unary_entry!(u32, m::sqrt_u32),
            unary_entry!(u64, m::sqrt_u64),
            unary_entry!(f32, m::sqrt_f32),
            unary_entry!(f64, m::sqrt_f64),
        ],
    }
}

/// Resolve and invoke one binary operation's kernel for `dtype`.
///
/// # Safety
/// Same pointer/shape validity requirements as [`binary_outer_iterate`].
#[allow(clippy::too_many_arguments)]
pub unsafe fn dispatch_binary(
    op: BinaryOp,
    dtype: Dtype,
    out_shape: &[isize],
    a_shape: &[isize],
    a_strides: &[isize],
    b_shape: &[isize],
    b_strides: &[isize],
    out_strides: &[isize],
    a_ptr: *const u8,
    b_ptr: *const u8,
    out_ptr: *mut u8,
) {
    let table = binary_table(op);
    let entry = table[dtype.index()];
    entry(out_shape, a_shape, a_strides, b_shape, b_strides, out_strides, a_ptr, b_ptr, out_ptr);
}

/// Resolve and invoke one unary operation's kernel for `dtype`.
///
/// # Safety
/// Same pointer/shape validity requirements as [`unary_outer_iterate`].
pub unsafe fn dispatch_unary(op: UnaryOp, dtype: Dtype, shape: &[isize], a_strides: &[isize], out_strides: &[isize], a_ptr: *const u8, out_ptr: *mut u8) {
    let table = unary_table(op);
    let entry = table[dtype.index()];
    entry(shape, a_strides, out_strides, a_ptr, out_ptr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::c_order_strides;

    #[test]
    fn dispatch_binary_add_f64_contiguous() {
        let a = [1.0f64, 2.0, 3.0];
        let b = [10.0f64, 20.0, 30.0];
        let mut out = [0.0f64; 3];
        let shape = [3isize];
        let strides = c_order_strides(&shape, 8);
        unsafe {
            dispatch_binary(
                BinaryOp::Add,
                Dtype::F64,
                &shape,
                &shape,
                strides.as_slice(),
                &shape,
                strides.as_slice(),
                strides.as_slice(),
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
            );
        }
        assert_eq!(out, [11.0, 22.0, 33.0]);
    }

    #[test]
    fn dispatch_unary_abs_i32() {
        let a = [-1i32, 2, -3];
        let mut out = [0i32; 3];
        let shape = [3isize];
        let strides = c_order_strides(&shape, 4);
        unsafe {
            dispatch_unary(UnaryOp::Abs, Dtype::I32, &shape, strides.as_slice(), strides.as_slice(), a.as_ptr() as *const u8, out.as_mut_ptr() as *mut u8);
        }
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn dispatch_binary_scalar_broadcast() {
        let a = [1i32, 2, 3, 4];
        let b = [100i32];
        let mut out = [0i32; 4];
        let a_shape = [4isize];
        let a_strides = c_order_strides(&a_shape, 4);
        let b_shape = crate::kernel::iterate::scalar_shape(1);
        let b_strides = crate::kernel::iterate::scalar_strides(1);
        unsafe {
            dispatch_binary(
                BinaryOp::Add,
                Dtype::I32,
                &a_shape,
                &a_shape,
                a_strides.as_slice(),
                &b_shape,
                &b_strides,
                a_strides.as_slice(),
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
            );
        }
        assert_eq!(out, [101, 102, 103, 104]);
    }
}

// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The array descriptor and the arena-scoped `Context` that owns its storage.
//!
//! A view's `'ctx` lifetime parameter ties it to the `Context` whose arena
//! backs its bytes, so the borrow checker rather than manual bookkeeping
//! enforces that no view outlives its backing storage. There is no
//! reference counting between views and their base array; the `Context` is
//! the sole owner.

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::dtype::{Dtype, Scalar};
use crate::error::{NumcError, Result};
use crate::shape::{self, ShapeVec};

/// Arrays the library itself allocates are aligned to at least this many
/// bytes, to admit wide SIMD loads in the kernel engine.
const MIN_ALIGN: usize = 32;

/// An arena-scoped allocation context.
///
/// Every `Array` produced through a `Context`'s methods borrows that
/// context for its `'ctx` lifetime; dropping the `Context` frees the whole
/// arena in one step and the borrow checker refuses to let any `Array`
/// outlive it. There is no explicit free method: `Context`'s `Drop` impl
/// is it.
pub struct Context {
    arena: bumpalo::Bump,
}

impl Context {
    pub fn new() -> Self {
        Context { arena: bumpalo::Bump::new() }
    }

    fn alloc_bytes(&self, nbytes: usize, align: usize) -> Result<NonNull<u8>> {
        let layout = Layout::from_size_align(nbytes, align).map_err(|_| NumcError::Invalid)?;
        if nbytes == 0 {
            // bumpalo happily hands back a well-aligned pointer for a
            // zero-size layout; we still route through it so `capacity`
            // bookkeeping stays uniform for empty arrays.
            return Ok(self.arena.alloc_layout(layout));
        }
        Ok(self.arena.alloc_layout(layout))
    }

    /// Allocate an array with uninitialized contents.
    pub fn create(&self, dtype: Dtype, shape: &[usize]) -> Result<Array<'_>> {
        let (shape_vec, size, capacity, elem_size) = plan_allocation(dtype, shape)?;
        let ptr = self.alloc_bytes(capacity, MIN_ALIGN)?;
        let strides = shape::c_order_strides(shape_vec.as_slice(), elem_size);
        Ok(Array {
            ptr,
            shape: shape_vec,
            strides,
            dtype,
            elem_size,
            size,
            capacity,
            is_contiguous: true,
            _marker: PhantomData,
        })
    }

    /// Allocate an array with every byte zeroed.
    pub fn zeros(&self, dtype: Dtype, shape: &[usize]) -> Result<Array<'_>> {
        let arr = self.create(dtype, shape)?;
        unsafe {
            std::ptr::write_bytes(arr.ptr.as_ptr(), 0, arr.capacity);
        }
        Ok(arr)
    }

    /// Allocate an array and write `value` to every logical element.
    pub fn fill(&self, shape: &[usize], value: Scalar) -> Result<Array<'_>> {
        let dtype = value.dtype();
        let arr = self.create(dtype, shape)?;
        let elem_size = arr.elem_size;
        let mut scratch = [0u8; 8];
        value.write_bytes(&mut scratch[..elem_size]);
        unsafe {
            let base = arr.ptr.as_ptr();
            for i in 0..arr.size {
                std::ptr::copy_nonoverlapping(scratch.as_ptr(), base.add(i * elem_size), elem_size);
            }
        }
        Ok(arr)
    }

    /// Allocate fresh backing storage with the given capacity, for internal
    /// use by rematerialization and copy.
    fn alloc_for(&self, capacity: usize) -> Result<NonNull<u8>> {
        self.alloc_bytes(capacity, MIN_ALIGN)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn plan_allocation(dtype: Dtype, shape: &[usize]) -> Result<(ShapeVec, usize, usize, usize)> {
    if shape.is_empty() {
        return Err(NumcError::Dim);
    }
    let elem_size = dtype.size();
    let mut shape_isize = Vec::with_capacity(shape.len());
    for &d in shape {
        shape_isize.push(isize::try_from(d).map_err(|_| NumcError::Overflow)?);
    }
    let size = shape::shape_size(&shape_isize)?;
    let capacity = size.checked_mul(elem_size).ok_or(NumcError::Size)?;
    Ok((ShapeVec::from_slice(&shape_isize), size, capacity, elem_size))
}

/// A strided view over context-owned bytes: shape, strides, dtype, and a
/// cached contiguity flag.
pub struct Array<'ctx> {
    ptr: NonNull<u8>,
    shape: ShapeVec,
    strides: ShapeVec,
    dtype: Dtype,
    elem_size: usize,
    size: usize,
    capacity: usize,
    is_contiguous: bool,
    _marker: PhantomData<&'ctx ()>,
}

impl<'ctx> Array<'ctx> {
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.is_contiguous
    }

    /// Shape as byte-sign-agnostic extents (always non-negative).
    #[inline]
    pub fn shape(&self) -> &[isize] {
        self.shape.as_slice()
    }

    /// Byte strides per dimension.
    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.strides.as_slice()
    }

    /// Raw pointer into the context-owned backing buffer this array's
    /// `shape`/`strides` index into. Public because the element-wise,
    /// reduction, and matmul kernels all take raw pointers at their
    /// boundary — there is no safe typed accessor, by design, since the
    /// dtype is only known dynamically at runtime.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn recompute_contiguity(&mut self) {
        self.is_contiguous = shape::is_contiguous(self.shape.as_slice(), self.strides.as_slice(), self.elem_size);
    }

    /// Raw byte slice over the logical extent of this array's *buffer*
    /// (not applying strides) — for bulk writes/copies where the caller
    /// guarantees contiguity.
    unsafe fn bytes_mut(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity)
    }

    /// Overwrite the data buffer with `size * elem_size` bytes copied
    /// verbatim, assuming C-order layout on the caller side.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_contiguous {
            return Err(NumcError::Contiguous);
        }
        let nbytes = self.size * self.elem_size;
        if data.len() != nbytes {
            return Err(NumcError::Size);
        }
        unsafe {
            self.bytes_mut()[..nbytes].copy_from_slice(data);
        }
        Ok(())
    }

    /// An independent, always-contiguous element-wise copy.
    pub fn copy(&self, ctx: &'ctx Context) -> Result<Array<'ctx>> {
        let capacity = self.capacity;
        let ptr = ctx.alloc_for(capacity)?;
        let strides = shape::c_order_strides(self.shape.as_slice(), self.elem_size);
        unsafe {
            copy_strided(
                self.ptr.as_ptr(),
                self.shape.as_slice(),
                self.strides.as_slice(),
                ptr.as_ptr(),
                self.elem_size,
            );
        }
        Ok(Array {
            ptr,
            shape: self.shape.clone(),
            strides,
            dtype: self.dtype,
            elem_size: self.elem_size,
            size: self.size,
            capacity,
            is_contiguous: true,
            _marker: PhantomData,
        })
    }

    /// In-place reshape, only on an already-contiguous array: rejects
    /// non-contiguous input rather than silently rematerializing.
    pub fn reshape(&mut self, new_shape: &[usize]) -> Result<()> {
        if !self.is_contiguous {
            return Err(NumcError::Contiguous);
        }
        let mut new_shape_isize = Vec::with_capacity(new_shape.len());
        for &d in new_shape {
            new_shape_isize.push(isize::try_from(d).map_err(|_| NumcError::Overflow)?);
        }
        let new_size = shape::shape_size(&new_shape_isize)?;
        if new_size != self.size {
            return Err(NumcError::Shape);
        }
        self.shape = ShapeVec::from_slice(&new_shape_isize);
        self.strides = shape::c_order_strides(self.shape.as_slice(), self.elem_size);
        self.is_contiguous = true;
        Ok(())
    }

    /// `reshape_copy`: rematerialize first (if needed), then reshape.
    /// Always succeeds as long as the element counts match.
    pub fn reshape_copy(&self, ctx: &'ctx Context, new_shape: &[usize]) -> Result<Array<'ctx>> {
        let mut out = self.copy(ctx)?;
        out.reshape(new_shape)?;
        Ok(out)
    }

    /// `transpose`: in-place permutation of shape and strides together.
    pub fn transpose(&mut self, axes: &[usize]) -> Result<()> {
        let ndim = self.ndim();
        if axes.len() != ndim {
            return Err(NumcError::Shape);
        }
        let mut seen = vec![false; ndim];
        for &ax in axes {
            if ax >= ndim || seen[ax] {
                return Err(NumcError::Shape);
            }
            seen[ax] = true;
        }
        let old_shape = self.shape.clone();
        let old_strides = self.strides.clone();
        for (i, &ax) in axes.iter().enumerate() {
            self.shape[i] = old_shape[ax];
            self.strides[i] = old_strides[ax];
        }
        self.recompute_contiguity();
        Ok(())
    }

    /// `transpose_copy`: transpose then rematerialize to a fresh contiguous array.
    pub fn transpose_copy(&self, ctx: &'ctx Context, axes: &[usize]) -> Result<Array<'ctx>> {
        let mut view = self.view();
        view.transpose(axes)?;
        view.contiguous(ctx)?;
        Ok(view)
    }

    /// A view over one axis with NumPy-style (start, stop, step)
    /// normalization.
    pub fn slice(&self, axis: usize, start: usize, stop: usize, step: usize) -> Result<Array<'ctx>> {
        if axis >= self.ndim() {
            return Err(NumcError::Axis);
        }
        let extent = self.shape[axis];
        let step = if step == 0 { 1 } else { step } as isize;
        let mut stop = stop as isize;
        if stop == 0 || stop > extent {
            stop = extent;
        }
        let mut start = start as isize;
        if start >= extent {
            start = extent - 1;
        }
        if start >= stop {
            return Err(NumcError::Shape);
        }
        let new_extent = ((stop - start) + step - 1) / step;

        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape[axis] = new_extent;
        strides[axis] = self.strides[axis] * step;

        let byte_offset = start * self.strides[axis];
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().offset(byte_offset)) };
        let size = shape::shape_size(shape.as_slice())?;
        let is_contig = shape::is_contiguous(shape.as_slice(), strides.as_slice(), self.elem_size);
        Ok(Array {
            ptr,
            shape,
            strides,
            dtype: self.dtype,
            elem_size: self.elem_size,
            size,
            capacity: self.capacity,
            is_contiguous: is_contig,
            _marker: PhantomData,
        })
    }

    /// Rematerialize to contiguous form in place (`contiguous`). No-op if
    /// already contiguous.
    pub fn contiguous(&mut self, ctx: &'ctx Context) -> Result<()> {
        if self.is_contiguous {
            return Ok(());
        }
        let capacity = self.capacity;
        let ptr = ctx.alloc_for(capacity)?;
        unsafe {
            copy_strided(self.ptr.as_ptr(), self.shape.as_slice(), self.strides.as_slice(), ptr.as_ptr(), self.elem_size);
        }
        self.ptr = ptr;
        self.strides = shape::c_order_strides(self.shape.as_slice(), self.elem_size);
        self.is_contiguous = true;
        Ok(())
    }

    /// A shallow clone of this descriptor, sharing the same backing bytes
    /// (a view of itself). Used internally by `transpose_copy` to build a
    /// transposed view before rematerializing it.
    fn view(&self) -> Array<'ctx> {
        Array {
            ptr: self.ptr,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            dtype: self.dtype,
            elem_size: self.elem_size,
            size: self.size,
            capacity: self.capacity,
            is_contiguous: self.is_contiguous,
            _marker: PhantomData,
        }
    }
}

/// Copy every logical element of a (possibly strided) source into a fresh
/// contiguous destination buffer, in C order. This is the byte-level
/// engine behind `copy`/`contiguous`: it collapses adjacent mergeable axes
/// first so a fully contiguous source degenerates to a single `memcpy`,
/// and falls back to an element-at-a-time coordinate walk otherwise.
/// Type-oblivious: it moves `elem_size`-byte chunks regardless of dtype.
unsafe fn copy_strided(src: *const u8, shape: &[isize], strides: &[isize], dst: *mut u8, elem_size: usize) {
    let (cshape, cstrides) = shape::collapse_dims(shape, strides);
    if cshape.is_empty() {
        // scalar-shaped (rank 0 after collapsing an all-ones shape): a single element.
        std::ptr::copy_nonoverlapping(src, dst, elem_size);
        return;
    }
    let last_stride = cstrides[cstrides.len() - 1];
    if last_stride == elem_size as isize {
        // Innermost collapsed axis is itself contiguous: copy it as one chunk per
        // outer coordinate instead of element-by-element.
        let chunk_elems = cshape[cshape.len() - 1] as usize;
        let chunk_bytes = chunk_elems * elem_size;
        let outer_shape = &cshape[..cshape.len() - 1];
        let outer_strides = &cstrides[..cstrides.len() - 1];
        walk_outer(outer_shape, outer_strides, &mut |src_off, dst_idx| {
            std::ptr::copy_nonoverlapping(src.offset(src_off), dst.add(dst_idx * chunk_bytes), chunk_bytes);
        });
    } else {
        walk_outer(cshape.as_slice(), cstrides.as_slice(), &mut |src_off, dst_idx| {
            std::ptr::copy_nonoverlapping(src.offset(src_off), dst.add(dst_idx * elem_size), elem_size);
        });
    }
}

/// Visit every coordinate of an (outer) shape in C order, calling `visit`
/// with the byte offset into the strided source and the sequential
/// (0-based) index into the contiguous destination.
unsafe fn walk_outer(shape: &[isize], strides: &[isize], visit: &mut dyn FnMut(isize, usize)) {
    if shape.is_empty() {
        visit(0, 0);
        return;
    }
    let mut counters = vec![0isize; shape.len()];
    let total: usize = shape.iter().map(|&d| d as usize).product();
    for seq in 0..total {
        let mut off = 0isize;
        for (i, &c) in counters.iter().enumerate() {
            off += c * strides[i];
        }
        visit(off, seq);
        // odometer increment, rightmost axis fastest
        for i in (0..shape.len()).rev() {
            counters[i] += 1;
            if counters[i] < shape[i] {
                break;
            }
            counters[i] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;

    #[test]
    fn create_then_zeros_is_contiguous() {
        let ctx = Context::new();
        let a = ctx.zeros(Dtype::F32, &[2, 3]).unwrap();
        assert!(a.is_contiguous());
        assert_eq!(a.size(), 6);
        assert_eq!(a.capacity(), 24);
    }

    #[test]
    fn fill_writes_every_element() {
        let ctx = Context::new();
        let a = ctx.fill(&[4], Scalar::I32(7)).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(a.data(), a.capacity()) };
        for chunk in bytes.chunks_exact(4) {
            assert_eq!(i32::from_ne_bytes(chunk.try_into().unwrap()), 7);
        }
    }

    #[test]
    fn reshape_rejects_noncontiguous() {
        let ctx = Context::new();
        let a = ctx.zeros(Dtype::I32, &[2, 3]).unwrap();
        let mut view = a.slice(1, 0, 3, 2).unwrap();
        assert!(!view.is_contiguous());
        assert_eq!(view.reshape(&[4]).unwrap_err(), NumcError::Contiguous);
    }

    #[test]
    fn reshape_preserves_size() {
        let ctx = Context::new();
        let mut a = ctx.zeros(Dtype::I32, &[2, 3]).unwrap();
        a.reshape(&[3, 2]).unwrap();
        assert_eq!(a.shape(), &[3, 2]);
        assert_eq!(a.size(), 6);
        assert!(a.is_contiguous());
    }

    #[test]
    fn transpose_is_self_inverse() {
        let ctx = Context::new();
        let mut a = ctx.zeros(Dtype::F64, &[2, 3, 4]).unwrap();
        let orig_shape = a.shape().to_vec();
        let orig_strides = a.strides().to_vec();
        a.transpose(&[2, 0, 1]).unwrap();
        // inverse permutation of [2,0,1] is [1,2,0]
        a.transpose(&[1, 2, 0]).unwrap();
        assert_eq!(a.shape(), &orig_shape[..]);
        assert_eq!(a.strides(), &orig_strides[..]);
    }

    #[test]
    fn slice_view_shares_base_bytes() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::I32, &[10]).unwrap();
        let bytes: Vec<i32> = (0..10).collect();
        a.write(unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const u8, bytes.len() * 4)
        })
        .unwrap();
        let view = a.slice(0, 0, 10, 2).unwrap();
        assert_eq!(view.shape(), &[5]);
        let out = unsafe { std::slice::from_raw_parts(view.data() as *const i32, 5) };
        // strided, not contiguous: stride 2 elements -> step through base array
        let mut collected = Vec::new();
        for i in 0..5 {
            let p = unsafe { view.data().offset(i as isize * view.strides()[0]) as *const i32 };
            collected.push(unsafe { *p });
        }
        let _ = out;
        assert_eq!(collected, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn contiguous_rematerializes_sliced_view() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::I32, &[10]).unwrap();
        let bytes: Vec<i32> = (0..10).collect();
        a.write(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const u8, 40) }).unwrap();
        let mut view = a.slice(0, 0, 10, 2).unwrap();
        assert!(!view.is_contiguous());
        view.contiguous(&ctx).unwrap();
        assert!(view.is_contiguous());
        let out = unsafe { std::slice::from_raw_parts(view.data() as *const i32, 5) };
        assert_eq!(out, &[0, 2, 4, 6, 8]);
    }

    #[test]
    fn copy_is_always_contiguous_and_equal() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::I32, &[2, 3]).unwrap();
        let bytes: Vec<i32> = (0..6).collect();
        a.write(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const u8, 24) }).unwrap();
        let mut t = a.transpose_copy(&ctx, &[1, 0]).unwrap();
        assert!(t.is_contiguous());
        let out = unsafe { std::slice::from_raw_parts(t.data() as *const i32, 6) };
        assert_eq!(out, &[0, 3, 1, 4, 2, 5]);
        let _ = t.contiguous(&ctx);
    }

    #[test]
    fn slice_step_larger_than_range_yields_single_element() {
        let ctx = Context::new();
        let mut a = ctx.create(Dtype::I32, &[10]).unwrap();
        let bytes: Vec<i32> = (0..10).collect();
        a.write(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const u8, 40) }).unwrap();
        let view = a.slice(0, 2, 4, 100).unwrap();
        assert_eq!(view.shape(), &[1]);
        let v = unsafe { *(view.data() as *const i32) };
        assert_eq!(v, 2);
    }

    use quickcheck::{quickcheck, TestResult};

    /// Turn arbitrary keys into a permutation of `0..keys.len()` by stable
    /// sort on the keys — always a bijection, so quickcheck never has to
    /// discard a case for an invalid `transpose` argument.
    fn permutation_from_keys(keys: &[u8]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by_key(|&i| keys[i]);
        order
    }

    fn invert(perm: &[usize]) -> Vec<usize> {
        let mut inv = vec![0usize; perm.len()];
        for (i, &p) in perm.iter().enumerate() {
            inv[p] = i;
        }
        inv
    }

    quickcheck! {
        fn transpose_then_inverse_restores_shape_and_strides(dims: Vec<u8>, keys: Vec<u8>) -> TestResult {
            if dims.is_empty() || dims.len() > 5 {
                return TestResult::discard();
            }
            let shape: Vec<usize> = dims.iter().map(|&d| (d % 4) as usize + 1).collect();
            let ctx = Context::new();
            let mut a = match ctx.zeros(Dtype::F32, &shape) {
                Ok(a) => a,
                Err(_) => return TestResult::discard(),
            };
            let mut keys: Vec<u8> = keys;
            keys.resize(shape.len(), 0);
            let perm = permutation_from_keys(&keys);
            let inv = invert(&perm);
            let orig_shape = a.shape().to_vec();
            let orig_strides = a.strides().to_vec();
            if a.transpose(&perm).is_err() || a.transpose(&inv).is_err() {
                return TestResult::discard();
            }
            TestResult::from_bool(a.shape() == &orig_shape[..] && a.strides() == &orig_strides[..])
        }
    }

    quickcheck! {
        fn reshape_round_trip_preserves_size(dims: Vec<u8>) -> TestResult {
            if dims.is_empty() || dims.len() > 4 {
                return TestResult::discard();
            }
            let shape: Vec<usize> = dims.iter().map(|&d| (d % 4) as usize + 1).collect();
            let ctx = Context::new();
            let mut a = match ctx.zeros(Dtype::F32, &shape) {
                Ok(a) => a,
                Err(_) => return TestResult::discard(),
            };
            let size = a.size();
            if a.reshape(&[size]).is_err() || a.reshape(&shape).is_err() {
                return TestResult::discard();
            }
            let expected_shape: Vec<isize> = shape.iter().map(|&d| d as isize).collect();
            TestResult::from_bool(a.size() == size && a.shape() == expected_shape.as_slice())
        }
    }
}

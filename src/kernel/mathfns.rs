// Copyright 2014-2016 bluss and ndarray developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-dtype arithmetic bodies for operations whose integer behavior isn't
//! just "do what the hardware instruction does": division, power, the
//! transcendental unary functions, `abs`, `neg`, and `clip`.
//!
//! Floats use the standard library's correctly-rounded implementations
//! directly rather than hand-rolled range-reduction polynomials — `std`'s
//! `f32`/`f64` math already meets or beats what a from-scratch Remez
//! approximation would, so reimplementing it would trade away correctness
//! for no benefit (recorded as an Open Question resolution in DESIGN.md).
//! Integer dtypes route through these same float primitives and cast back,
//! which is where the interesting per-width decisions live.

macro_rules! narrow_int_div {
    ($name:ident, $t:ty) => {
        /// Narrow integer division via an `f32` intermediate: narrow widths
        /// can't lose precision going through a float, and this keeps one
        /// division code path instead of the hardware integer divider's
        /// differing trap-on-zero behavior across widths.
        pub fn $name(a: $t, b: $t) -> $t {
            if b == 0 {
                return 0;
            }
            ((a as f32) / (b as f32)) as $t
        }
    };
}

macro_rules! double_int_div {
    ($name:ident, $t:ty) => {
        /// 32-bit integer division via an `f64` intermediate: wide enough to
        /// round-trip every `i32`/`u32` value exactly, so the cast introduces
        /// no precision loss, and it saturates a zero divisor to 0 the same
        /// way the narrower widths do instead of trapping.
        pub fn $name(a: $t, b: $t) -> $t {
            if b == 0 {
                return 0;
            }
            ((a as f64) / (b as f64)) as $t
        }
    };
}

macro_rules! wide_int_div {
    ($name:ident, $t:ty) => {
        /// Wide integer division: native truncating divide, zero divisor
        /// saturates to 0 rather than panicking (the closure signature has
        /// no error channel; the public surface validates shape/dtype, not
        /// every element, so an element-wise trap would be a bad fit here).
        pub fn $name(a: $t, b: $t) -> $t {
            a.checked_div(b).unwrap_or(0)
        }
    };
}

narrow_int_div!(div_i8, i8);
narrow_int_div!(div_u8, u8);
narrow_int_div!(div_i16, i16);
narrow_int_div!(div_u16, u16);
double_int_div!(div_i32, i32);
double_int_div!(div_u32, u32);
wide_int_div!(div_i64, i64);
wide_int_div!(div_u64, u64);

pub fn div_f32(a: f32, b: f32) -> f32 {
    a / b
}
pub fn div_f64(a: f64, b: f64) -> f64 {
    a / b
}

macro_rules! int_pow_signed {
    ($name:ident, $t:ty) => {
        /// Square-and-multiply for non-negative exponents (exact). A
        /// negative exponent can't be represented by an integer result
        /// (the true value lies in `(-1, 1)` for any base other than
        /// +/-1), so it's defined to be 0.
        pub fn $name(base: $t, exp: $t) -> $t {
            if exp < 0 {
                return 0;
            }
            let mut result: $t = 1;
            let mut b = base;
            let mut e = exp as u32;
            while e > 0 {
                if e & 1 == 1 {
                    result = result.wrapping_mul(b);
                }
                b = b.wrapping_mul(b);
                e >>= 1;
            }
            result
        }
    };
}

macro_rules! int_pow_unsigned {
    ($name:ident, $t:ty) => {
        pub fn $name(base: $t, exp: $t) -> $t {
            let mut result: $t = 1;
            let mut b = base;
            let mut e = exp;
            while e > 0 {
                if e & 1 == 1 {
                    result = result.wrapping_mul(b);
                }
                b = b.wrapping_mul(b);
                e >>= 1;
            }
            result
        }
    };
}

int_pow_signed!(pow_i8, i8);
int_pow_signed!(pow_i16, i16);
int_pow_signed!(pow_i32, i32);
int_pow_signed!(pow_i64, i64);
int_pow_unsigned!(pow_u8, u8);
int_pow_unsigned!(pow_u16, u16);
int_pow_unsigned!(pow_u32, u32);
int_pow_unsigned!(pow_u64, u64);

pub fn pow_f32(base: f32, exp: f32) -> f32 {
    base.powf(exp)
}
pub fn pow_f64(base: f64, exp: f64) -> f64 {
    base.powf(exp)
}

pub fn maximum_f32(a: f32, b: f32) -> f32 {
    a.max(b)
}
pub fn maximum_f64(a: f64, b: f64) -> f64 {
    a.max(b)
}
pub fn minimum_f32(a: f32, b: f32) -> f32 {
    a.min(b)
}
pub fn minimum_f64(a: f64, b: f64) -> f64 {
    a.min(b)
}

macro_rules! int_minmax {
    ($max_name:ident, $min_name:ident, $t:ty) => {
        pub fn $max_name(a: $t, b: $t) -> $t {
            if a >= b {
                a
            } else {
                b
            }
        }
        pub fn $min_name(a: $t, b: $t) -> $t {
            if a <= b {
                a
            } else {
                b
            }
        }
    };
}

int_minmax!(maximum_i8, minimum_i8, i8);
int_minmax!(maximum_i16, minimum_i16, i16);
int_minmax!(maximum_i32, minimum_i32, i32);
int_minmax!(maximum_i64, minimum_i64, i64);
int_minmax!(maximum_u8, minimum_u8, u8);
int_minmax!(maximum_u16, minimum_u16, u16);
int_minmax!(maximum_u32, minimum_u32, u32);
int_minmax!(maximum_u64, minimum_u64, u64);

/// Negation: signed/float negate normally; unsigned types wrap (two's
/// complement "negate" the way the hardware instruction defines it, since
/// there is no negative range to saturate toward).
macro_rules! neg_wrapping {
    ($name:ident, $t:ty) => {
        pub fn $name(a: $t) -> $t {
            a.wrapping_neg()
        }
    };
}
neg_wrapping!(neg_i8, i8);
neg_wrapping!(neg_i16, i16);
neg_wrapping!(neg_i32, i32);
neg_wrapping!(neg_i64, i64);
neg_wrapping!(neg_u8, u8);
neg_wrapping!(neg_u16, u16);
neg_wrapping!(neg_u32, u32);
neg_wrapping!(neg_u64, u64);
pub fn neg_f32(a: f32) -> f32 {
    -a
}
pub fn neg_f64(a: f64) -> f64 {
    -a
}

/// Conditional-select abs, rather than calling `i32::abs`/`f32::abs`
/// directly, so every dtype (including the ones with no library `abs`)
/// shares one implementation shape.
macro_rules! abs_signed {
    ($name:ident, $t:ty) => {
        pub fn $name(a: $t) -> $t {
            if a < 0 {
                a.wrapping_neg()
            } else {
                a
            }
        }
    };
}
abs_signed!(abs_i8, i8);
abs_signed!(abs_i16, i16);
abs_signed!(abs_i32, i32);
abs_signed!(abs_i64, i64);
pub fn abs_u8(a: u8) -> u8 {
    a
}
pub fn abs_u16(a: u16) -> u16 {
    a
}
pub fn abs_u32(a: u32) -> u32 {
    a
}
pub fn abs_u64(a: u64) -> u64 {
    a
}
pub fn abs_f32(a: f32) -> f32 {
    if a < 0.0 {
        -a
    } else {
        a
    }
}
pub fn abs_f64(a: f64) -> f64 {
    if a < 0.0 {
        -a
    } else {
        a
    }
}

pub fn sqrt_f32(a: f32) -> f32 {
    a.sqrt()
}
pub fn sqrt_f64(a: f64) -> f64 {
    a.sqrt()
}
/// `x <= 0` has no real logarithm (`ln` gives `-inf` at 0, `NaN` below it);
/// this crate defines both as 0 rather than propagating a non-finite value.
pub fn log_f32(a: f32) -> f32 {
    if a <= 0.0 {
        0.0
    } else {
        a.ln()
    }
}
pub fn log_f64(a: f64) -> f64 {
    if a <= 0.0 {
        0.0
    } else {
        a.ln()
    }
}
pub fn exp_f32(a: f32) -> f32 {
    a.exp()
}
pub fn exp_f64(a: f64) -> f64 {
    a.exp()
}

/// Signed-integer sqrt: negative inputs clamp to zero before the float
/// round-trip rather than producing a NaN-cast garbage value, since the
/// destination type has no representation for "not a number".
macro_rules! signed_int_transcendental {
    ($sqrt_name:ident, $log_name:ident, $exp_name:ident, $t:ty) => {
        pub fn $sqrt_name(a: $t) -> $t {
            let clamped = if a < 0 { 0 as f64 } else { a as f64 };
            clamped.sqrt() as $t
        }
        pub fn $log_name(a: $t) -> $t {
            log_f64(a as f64) as $t
        }
        pub fn $exp_name(a: $t) -> $t {
            (a as f64).exp() as $t
        }
    };
}

macro_rules! unsigned_int_transcendental {
    ($sqrt_name:ident, $log_name:ident, $exp_name:ident, $t:ty) => {
        pub fn $sqrt_name(a: $t) -> $t {
            (a as f64).sqrt() as $t
        }
        pub fn $log_name(a: $t) -> $t {
            log_f64(a as f64) as $t
        }
        pub fn $exp_name(a: $t) -> $t {
            (a as f64).exp() as $t
        }
    };
}

signed_int_transcendental!(sqrt_i8, log_i8, exp_i8, i8);
signed_int_transcendental!(sqrt_i16, log_i16, exp_i16, i16);
signed_int_transcendental!(sqrt_i32, log_i32, exp_i32, i32);
signed_int_transcendental!(sqrt_i64, log_i64, exp_i64, i64);
unsigned_int_transcendental!(sqrt_u8, log_u8, exp_u8, u8);
unsigned_int_transcendental!(sqrt_u16, log_u16, exp_u16, u16);
unsigned_int_transcendental!(sqrt_u32, log_u32, exp_u32, u32);
unsigned_int_transcendental!(sqrt_u64, log_u64, exp_u64, u64);

/// NaN-preserving clamp: if `a` is NaN, a NaN propagates rather than being
/// silently replaced by `lo`/`hi` the way a naive `max(lo).min(hi)` chain
/// would under IEEE 754 comparison rules.
pub fn clip_f32(a: f32, lo: f32, hi: f32) -> f32 {
    if a.is_nan() {
        a
    } else if a < lo {
        lo
    } else if a > hi {
        hi
    } else {
        a
    }
}
pub fn clip_f64(a: f64, lo: f64, hi: f64) -> f64 {
    if a.is_nan() {
        a
    } else if a < lo {
        lo
    } else if a > hi {
        hi
    } else {
        a
    }
}
macro_rules! clip_ord {
    ($name:ident, $t:ty) => {
        pub fn $name(a: $t, lo: $t, hi: $t) -> $t {
            if a < lo {
                lo
            } else if a > hi {
                hi
            } else {
                a
            }
        }
    };
}
clip_ord!(clip_i8, i8);
clip_ord!(clip_i16, i16);
clip_ord!(clip_i32, i32);
clip_ord!(clip_i64, i64);
clip_ord!(clip_u8, u8);
clip_ord!(clip_u16, u16);
clip_ord!(clip_u32, u32);
clip_ord!(clip_u64, u64);

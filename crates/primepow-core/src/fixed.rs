//! Fixed-point arithmetic with an implicit 2^48 scale.
//!
//! Consensus code never touches floating point. The `f64` helpers at the
//! bottom of this module are for display only.

use num_bigint::BigUint;
use num_traits::ToPrimitive;

/// Number of fractional bits in a fixed-point difficulty or merit.
pub const FRACTION_BITS: u32 = 48;

/// 1.0 in fixed point.
pub const TWO_POW48: u64 = 1 << FRACTION_BITS;

/// `floor(ln(150) · 2^48)`, the log of the mainnet block spacing.
pub const LN_150_FP48: u64 = 1_410_368_452_711_334;

/// `floor(ln(300) · 2^48)`, the log of the testnet block spacing.
pub const LN_300_FP48: u64 = 1_605_472_039_216_502;

/// `ln(2) · 2^128`, truncated.
const LN2_FP128: u128 = 0xb172_17f7_d1cf_79ab_c9e3_b398_03f2_f6af;

/// Bits kept in the normalized mantissa while squaring.
const MANTISSA_BITS: u64 = 62;

/// `floor(ln(x) · 2^48)` using integer arithmetic only.
///
/// `x` is normalized into `[2^62, 2^63)` and the 64 fractional bits of
/// `log2(x)` are extracted by repeated squaring, then scaled by `ln 2`.
/// Returns 0 for `x <= 1` and saturates at `u64::MAX`.
pub fn ln_fixed(x: &BigUint) -> u64 {
    let bits = x.bits();
    if bits <= 1 {
        return 0;
    }

    let exponent = bits - 1;
    let mut mantissa: u128 = if exponent <= MANTISSA_BITS {
        u128::from(x.to_u64().unwrap_or(0)) << (MANTISSA_BITS - exponent)
    } else {
        u128::from((x >> (exponent - MANTISSA_BITS)).to_u64().unwrap_or(0))
    };

    let mut fraction: u64 = 0;
    for _ in 0..64 {
        mantissa = (mantissa * mantissa) >> MANTISSA_BITS;
        fraction <<= 1;
        if mantissa >= 1u128 << (MANTISSA_BITS + 1) {
            mantissa >>= 1;
            fraction |= 1;
        }
    }

    let log2_fp64 = (BigUint::from(exponent) << 64u32) | BigUint::from(fraction);
    let ln = (log2_fp64 * LN2_FP128) >> (64u32 + 128 - FRACTION_BITS);
    ln.to_u64().unwrap_or(u64::MAX)
}

/// [`ln_fixed`] for a machine integer.
#[inline]
pub fn ln_fixed_u64(x: u64) -> u64 {
    ln_fixed(&BigUint::from(x))
}

/// Fixed-point value as a float, for display.
#[inline]
pub fn to_f64(value: u64) -> f64 {
    value as f64 / TWO_POW48 as f64
}

/// Nearest fixed-point value to a float, for tests and tooling.
pub fn from_f64(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    (value * TWO_POW48 as f64).round() as u64
}

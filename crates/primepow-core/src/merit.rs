//! Merit of a found constellation or gap, in 2^48 fixed point.
//!
//! Merit is `(end - start) / ln(start)`. It only feeds miner statistics and
//! self-reporting, never block validity.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::fixed::{ln_fixed, FRACTION_BITS};
use crate::hash::double_sha256_parts;

/// `floor((end - start) · 2^96 / ln_fixed(start))`, i.e. merit scaled by 2^48.
///
/// Returns 0 when `end <= start`, when `start <= 1`, or when the result does not fit a `u64`.
pub fn merit(start: &BigUint, end: &BigUint) -> u64 {
    if end <= start {
        return 0;
    }
    let ln = ln_fixed(start);
    if ln == 0 {
        return 0;
    }
    let gap = end - start;
    ((gap << (2 * FRACTION_BITS)) / ln).to_u64().unwrap_or(0)
}

/// Deterministic 64-bit seed for the fractional part of a difficulty.
///
/// Double SHA256 of `start` then `end` (little-endian bytes), folded by XOR over
/// its four little-endian 64-bit words.
pub fn sub_merit_seed(start: &BigUint, end: &BigUint) -> u64 {
    let start_bytes = start.to_bytes_le();
    let end_bytes = end.to_bytes_le();
    let hash = double_sha256_parts(&[&start_bytes, &end_bytes]);

    hash.chunks_exact(8).fold(0u64, |acc, chunk| {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        acc ^ u64::from_le_bytes(word)
    })
}

/// Merit plus a pseudo-random fraction below the merit of the smallest possible gap (2).
pub fn achieved_difficulty(start: &BigUint, end: &BigUint) -> u64 {
    let ln = ln_fixed(start);
    let min_gap_merit = if ln == 0 {
        1
    } else {
        ((BigUint::from(2u32) << (2 * FRACTION_BITS)) / ln)
            .to_u64()
            .unwrap_or(1)
            .max(1)
    };
    merit(start, end).saturating_add(sub_merit_seed(start, end) % min_gap_merit)
}

/// Gap length needed at `start` to reach `difficulty` (2^48 fixed point).
pub fn target_gap(start: &BigUint, difficulty: u64) -> u64 {
    let product = BigUint::from(difficulty) * ln_fixed(start);
    (product >> (2 * FRACTION_BITS)).to_u64().unwrap_or(0)
}

/// Merit as a float, for display.
pub fn merit_f64(start: &BigUint, end: &BigUint) -> f64 {
    if end <= start || start.is_zero() {
        return 0.0;
    }
    crate::fixed::to_f64(merit(start, end))
}

/// Expected candidates to test per success at `difficulty`, `e^difficulty`, for display.
pub fn expected_work(difficulty: u64) -> f64 {
    crate::fixed::to_f64(difficulty).exp()
}

//! Target generation and proof-of-work payload decoding.
//!
//! A header commits to a search origin (the target) through its proof-of-work
//! hash and compact difficulty. The payload then selects an offset below
//! `2^trailing_zero_bits`, and `target + offset` is the first member of the
//! claimed constellation.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, ToPrimitive};
use thiserror::Error;

use crate::block::{BlockHeader, PowNonce, PowVersion};
use crate::difficulty::{CompactError, DifficultyParts};
use crate::network::ConsensusParams;
use crate::primes::PrimeTable;

/// Zero bits between the leading 1 and the hash in a target.
pub const ZEROS_BEFORE_HASH: u32 = 8;

/// Bits of a target before zero padding: the leading 1, the zeros, and the hash.
pub const SIGNIFICANT_BITS: u32 = 1 + ZEROS_BEFORE_HASH + 256;

/// Reasons a payload cannot be decoded. Every one rejects the block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown proof-of-work version (low nonce bits {0:#06x})")]
    UnknownPowVersion(u16),

    #[error("invalid compact difficulty: {0}")]
    InvalidDifficulty(#[from] CompactError),

    #[error("difficulty {0} is below the 265 significant target bits")]
    DifficultyTooLow(u32),

    #[error("primorial of the first {primorial_number} primes exceeds 2^{trailing_zero_bits}")]
    PrimorialTooLarge {
        primorial_number: u16,
        trailing_zero_bits: u32,
    },

    #[error("offset is not below 2^{trailing_zero_bits}")]
    OffsetTooLarge { trailing_zero_bits: u32 },
}

/// A decoded proof-of-work claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPow {
    /// Payload encoding.
    pub version: PowVersion,
    /// Difficulty the header claims.
    pub difficulty: DifficultyParts,
    /// Search origin derived from the proof-of-work hash.
    pub target: BigUint,
    /// Distance from the target to the candidate.
    pub offset: BigUint,
    /// `target + offset`, the first member of the constellation.
    pub candidate: BigUint,
    /// Zero bits padding the target; the offset must fit below them.
    pub trailing_zero_bits: u32,
}

/// `round(2^(8 + f/256) - 2^8)` for a fractional byte, in integers only.
#[inline]
pub fn fractional_correction(fraction: u8) -> u64 {
    let f = u64::from(fraction);
    (10 * f * f * f + 7383 * f * f + 5_840_720 * f + 3_997_440) >> 23
}

/// Build the target for a proof-of-work hash at the given difficulty.
///
/// Returns the target and its number of trailing zero bits.
pub fn generate_target(
    pow_hash: &[u8; 32],
    difficulty: DifficultyParts,
    version: PowVersion,
) -> Result<(BigUint, u32), DecodeError> {
    if difficulty.integer < SIGNIFICANT_BITS {
        return Err(DecodeError::DifficultyTooLow(difficulty.integer));
    }
    let trailing_zero_bits = difficulty.integer - SIGNIFICANT_BITS;

    let target = match version {
        PowVersion::Legacy => {
            // Hash bits are taken least significant first within each byte.
            let mut reflected = [0u8; 32];
            for (out, byte) in reflected.iter_mut().zip(pow_hash.iter()) {
                *out = byte.reverse_bits();
            }
            (BigUint::from(1u32 << ZEROS_BEFORE_HASH) << 256u32)
                + BigUint::from_bytes_be(&reflected)
        }
        PowVersion::Current => {
            let mantissa = (1u64 << ZEROS_BEFORE_HASH) + fractional_correction(difficulty.fraction);
            (BigUint::from(mantissa) << 256u32) + BigUint::from_bytes_le(pow_hash)
        }
    };

    Ok((target << trailing_zero_bits, trailing_zero_bits))
}

/// Offset encoded by a current-version payload.
///
/// `offset = P - (target mod P) + multiplier * P + remainder`, with `P` the
/// primorial of the first `primorial_number` primes.
pub fn current_offset(
    nonce: &PowNonce,
    target: &BigUint,
    trailing_zero_bits: u32,
    table: &PrimeTable,
) -> Result<BigUint, DecodeError> {
    let primorial_number = nonce.primorial_number();
    let limit = BigUint::one() << trailing_zero_bits;
    let primorial = table
        .primorial_bounded(usize::from(primorial_number), &limit)
        .ok_or(DecodeError::PrimorialTooLarge {
            primorial_number,
            trailing_zero_bits,
        })?;

    let base = &primorial - (target % &primorial);
    Ok(base + &primorial * nonce.primorial_multiplier() + nonce.primorial_remainder())
}

/// Decode a header's proof-of-work claim, enforcing every range check.
pub fn decode(header: &BlockHeader, params: &ConsensusParams) -> Result<DecodedPow, DecodeError> {
    let version = header
        .pow_version()
        .ok_or(DecodeError::UnknownPowVersion(header.nonce.low_u16()))?;
    let difficulty = header.bits.parts(version, params)?;
    let (target, trailing_zero_bits) = generate_target(&header.pow_hash(), difficulty, version)?;

    let offset = match version {
        PowVersion::Legacy => header.nonce.to_biguint(),
        PowVersion::Current => {
            current_offset(&header.nonce, &target, trailing_zero_bits, PrimeTable::global())?
        }
    };

    if offset.bits() > u64::from(trailing_zero_bits) {
        return Err(DecodeError::OffsetTooLarge { trailing_zero_bits });
    }

    let candidate = &target + &offset;
    Ok(DecodedPow {
        version,
        difficulty,
        target,
        offset,
        candidate,
        trailing_zero_bits,
    })
}

/// Encode `offset` as a current-version payload over the given primorial.
///
/// Inverse of [`current_offset`]. Returns `None` if the offset lies below the
/// first primorial multiple past the target, or if the multiplier or remainder
/// do not fit their fields.
pub fn encode_current_nonce(
    target: &BigUint,
    offset: &BigUint,
    primorial_number: u16,
    table: &PrimeTable,
) -> Option<PowNonce> {
    let primorial = table.primorial(usize::from(primorial_number))?;
    let base = &primorial - (target % &primorial);
    if offset < &base {
        return None;
    }
    let (multiplier, remainder) = (offset - &base).div_rem(&primorial);
    PowNonce::current(primorial_number, multiplier.to_u64()?, &remainder)
}

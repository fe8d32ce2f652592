//! Search setup for one header: target, primorial, remainder and multiplier range.
//!
//! Every candidate has the form `base + k * P` where `P` is a primorial and
//! `base = target + P - (target mod P) + r`. The remainder `r` is chosen so
//! that no prime dividing `P` divides any member of the pattern, so the sieve
//! only has to deal with primes past the primorial.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use primepow_core::block::{BlockHeader, PowNonce, PowVersion, CURRENT_POW_TAG, REMAINDER_BITS};
use primepow_core::constellation::{AcceptedPattern, PatternError};
use primepow_core::network::ConsensusParams;
use primepow_core::primes::PrimeTable;
use primepow_core::target::{generate_target, DecodeError};
use thiserror::Error;

/// Bits of offset range left to the multiplier when the primorial is chosen automatically.
pub const MULTIPLIER_HEADROOM_BITS: u32 = 16;

/// Largest offset a legacy payload can carry, in bits.
const LEGACY_OFFSET_BITS: u32 = 256;

/// Reasons a header cannot be set up for mining.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("cannot derive target: {0}")]
    Decode(#[from] DecodeError),

    #[error("pattern cannot be mined: {0}")]
    Pattern(#[from] PatternError),

    #[error("primorial of the first {primorial_number} primes does not fit {offset_bits} offset bits or the remainder field")]
    PrimorialTooLarge {
        primorial_number: u16,
        offset_bits: u32,
    },

    #[error("no multiplier keeps the offset below 2^{offset_bits}")]
    NoSearchSpace { offset_bits: u32 },
}

/// Nonce whose layout and version tag match every payload of `version`.
///
/// The proof-of-work hash only depends on these bits, so a header carrying
/// this nonce hashes the same as one carrying the final payload.
pub fn template_nonce(version: PowVersion) -> PowNonce {
    let mut nonce = PowNonce::default();
    match version {
        PowVersion::Legacy => nonce.0[0] = 1,
        PowVersion::Current => nonce.0[..2].copy_from_slice(&CURRENT_POW_TAG.to_le_bytes()),
    }
    nonce
}

/// Largest primorial number whose primorial leaves [`MULTIPLIER_HEADROOM_BITS`]
/// of the offset range and fits the remainder field.
pub fn auto_primorial_number(offset_bits: u32, table: &PrimeTable) -> u16 {
    let limit_bits = offset_bits
        .saturating_sub(MULTIPLIER_HEADROOM_BITS)
        .min(REMAINDER_BITS);
    let limit = BigUint::one() << limit_bits;

    let mut product = BigUint::one();
    let mut count = 0u16;
    for &p in table.as_slice() {
        product *= p;
        if product > limit || count == u16::MAX {
            break;
        }
        count += 1;
    }
    count
}

/// `n mod p` for a small modulus.
pub(crate) fn residue(n: &BigUint, p: u32) -> u64 {
    (n % p).iter_u64_digits().next().unwrap_or(0)
}

/// Inverse of `a` modulo `m`, if it exists.
pub(crate) fn mod_inverse(a: u64, m: u64) -> Option<u64> {
    let (mut old_r, mut r) = (i128::from(a % m), i128::from(m));
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }
    if old_r != 1 {
        return None;
    }
    u64::try_from(old_s.rem_euclid(i128::from(m))).ok()
}

/// Remainder modulo the product of `primes` that keeps every pattern member
/// coprime to each of them. Per prime the smallest admissible residue is used.
pub fn admissible_remainder(
    pattern: &AcceptedPattern,
    primes: &[u32],
) -> Result<BigUint, PatternError> {
    let offsets = pattern.offsets();
    let mut remainder = BigUint::zero();
    let mut modulus = BigUint::one();

    for &p in primes {
        let p64 = u64::from(p);
        let wanted = (0..p64)
            .find(|a| offsets.iter().all(|o| (a + o % p64) % p64 != 0))
            .ok_or(PatternError::Inadmissible(p))?;

        // remainder + modulus * t = wanted (mod p)
        let current = residue(&remainder, p);
        let inverse = mod_inverse(residue(&modulus, p), p64).ok_or(PatternError::Inadmissible(p))?;
        let t = (wanted + p64 - current) % p64 * inverse % p64;
        remainder += &modulus * t;
        modulus *= p;
    }
    Ok(remainder)
}

/// Everything a worker needs to turn a multiplier into a candidate and a payload.
#[derive(Debug, Clone)]
pub struct OffsetPlan {
    /// Payload encoding being mined.
    pub version: PowVersion,
    /// Pattern searched for.
    pub pattern: AcceptedPattern,
    /// Search origin.
    pub target: BigUint,
    /// Zero bits below the target.
    pub trailing_zero_bits: u32,
    /// Number of leading primes in the primorial.
    pub primorial_number: u16,
    /// Product of the first `primorial_number` primes.
    pub primorial: BigUint,
    /// Admissible remainder modulo the primorial.
    pub remainder: BigUint,
    /// Offset of multiplier 0.
    pub first_offset: BigUint,
    /// Candidate of multiplier 0.
    pub base: BigUint,
    /// Multipliers `0..multiplier_limit` keep the offset in range.
    pub multiplier_limit: u64,
}

impl OffsetPlan {
    /// Set up mining of `pattern` on `header` with the payload encoding `version`.
    ///
    /// The header's nonce is ignored.
    pub fn new(
        header: &BlockHeader,
        version: PowVersion,
        params: &ConsensusParams,
        pattern: AcceptedPattern,
        primorial_number: Option<u16>,
        table: &PrimeTable,
    ) -> Result<Self, PlanError> {
        pattern.check_admissible(table.as_slice())?;

        let mut template = header.clone();
        template.nonce = template_nonce(version);
        let difficulty = header.bits.parts(version, params).map_err(DecodeError::from)?;
        let (target, trailing_zero_bits) =
            generate_target(&template.pow_hash(), difficulty, version)?;

        let offset_bits = match version {
            PowVersion::Current => trailing_zero_bits,
            PowVersion::Legacy => trailing_zero_bits.min(LEGACY_OFFSET_BITS),
        };
        let offset_limit = BigUint::one() << offset_bits;

        let primorial_number =
            primorial_number.unwrap_or_else(|| auto_primorial_number(offset_bits, table));
        let too_large = PlanError::PrimorialTooLarge {
            primorial_number,
            offset_bits,
        };
        let primorial = table
            .primorial_bounded(usize::from(primorial_number), &offset_limit)
            .ok_or(too_large.clone())?;
        if version == PowVersion::Current && primorial.bits() > u64::from(REMAINDER_BITS) {
            return Err(too_large);
        }

        let primes = &table.as_slice()[..usize::from(primorial_number)];
        let remainder = admissible_remainder(&pattern, primes)?;

        let first_offset = &primorial - (&target % &primorial) + &remainder;
        if first_offset >= offset_limit {
            return Err(PlanError::NoSearchSpace { offset_bits });
        }
        let count = (&offset_limit - &first_offset - 1u32) / &primorial + 1u32;
        let multiplier_limit = count.to_u64().unwrap_or(u64::MAX);
        let base = &target + &first_offset;

        Ok(OffsetPlan {
            version,
            pattern,
            target,
            trailing_zero_bits,
            primorial_number,
            primorial,
            remainder,
            first_offset,
            base,
            multiplier_limit,
        })
    }

    /// Offset from the target for a multiplier.
    pub fn offset(&self, multiplier: u64) -> BigUint {
        &self.first_offset + &self.primorial * multiplier
    }

    /// First pattern member for a multiplier.
    pub fn candidate(&self, multiplier: u64) -> BigUint {
        &self.base + &self.primorial * multiplier
    }

    /// Payload selecting the candidate of `multiplier`.
    pub fn encode(&self, multiplier: u64) -> Option<PowNonce> {
        match self.version {
            PowVersion::Current => {
                PowNonce::current(self.primorial_number, multiplier, &self.remainder)
            }
            PowVersion::Legacy => PowNonce::legacy(&self.offset(multiplier)),
        }
    }
}

//! Compact difficulty encodings and the logarithmic difficulty adjuster.
//!
//! Two compact encodings exist. Legacy blocks use the Bitcoin-style
//! exponent/mantissa form to store an integer difficulty. Current blocks store
//! the difficulty directly in 24.8 fixed point. The adjuster works on
//! [`FixedPointDifficulty`] (scale 2^48) and never uses floating point.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use thiserror::Error;

use crate::block::PowVersion;
use crate::fixed::{self, ln_fixed_u64, FRACTION_BITS, TWO_POW48};
use crate::network::{ConsensusParams, DECREASE_SHIFT, INCREASE_SHIFT};

/// Largest integer difficulty (bit length of a candidate) either encoding may express.
pub const MAX_DIFFICULTY_BITS: u32 = 65_535;

/// Bits between the 24.8 compact and the 2^48 fixed-point scale.
const COMPACT_TO_FIXED_SHIFT: u32 = FRACTION_BITS - 8;

/// Errors raised while interpreting a compact difficulty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("compact difficulty {0:#010x} has the sign bit set")]
    Negative(u32),

    #[error("compact difficulty {0:#010x} overflows")]
    Overflow(u32),

    #[error("compact difficulty is zero")]
    Zero,

    #[error("difficulty {difficulty} below minimum {minimum}")]
    TooEasy { difficulty: u64, minimum: u64 },

    #[error("difficulty {difficulty} above maximum {maximum}")]
    TooHard { difficulty: u64, maximum: u64 },
}

/// Integer and fractional parts of a decoded difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyParts {
    /// Bit length of a candidate at this difficulty.
    pub integer: u32,
    /// Fractional byte (1/256 units); always 0 for legacy blocks.
    pub fraction: u8,
}

/// Difficulty in 32-bit compact form, as stored in a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompactDifficulty(pub u32);

impl CompactDifficulty {
    /// Encode a current-version difficulty.
    pub fn from_parts(integer: u32, fraction: u8) -> Self {
        CompactDifficulty((integer << 8) | u32::from(fraction))
    }

    /// Expand a legacy exponent/mantissa compact into its integer value.
    ///
    /// The value is `mantissa * 256^(exponent - 3)`, rejecting the sign bit,
    /// values past 256 bits and zero.
    pub fn expand_legacy(self) -> Result<BigUint, CompactError> {
        let bits = self.0;
        let size = bits >> 24;
        let mut word = bits & 0x007f_ffff;

        if word != 0 && bits & 0x0080_0000 != 0 {
            return Err(CompactError::Negative(bits));
        }
        if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
            return Err(CompactError::Overflow(bits));
        }

        let value = if size <= 3 {
            word >>= 8 * (3 - size);
            BigUint::from(word)
        } else {
            BigUint::from(word) << (8 * (size - 3))
        };

        if value.is_zero() {
            return Err(CompactError::Zero);
        }
        Ok(value)
    }

    /// Encode an integer value in the legacy exponent/mantissa form.
    ///
    /// Inverse of [`CompactDifficulty::expand_legacy`] for values that fit the mantissa.
    pub fn legacy_from_value(value: &BigUint) -> Self {
        let mut size = value.bits().div_ceil(8) as u32;
        let mut compact = if size <= 3 {
            value.to_u32().unwrap_or(0) << (8 * (3 - size))
        } else {
            (value >> (8 * (size - 3))).to_u32().unwrap_or(0)
        };

        // The mantissa's high bit is the sign flag, so shift it out of the way.
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }

        CompactDifficulty((size << 24) | (compact & 0x007f_ffff))
    }

    /// Decode and range-check the difficulty for a block of the given version.
    pub fn parts(
        self,
        version: PowVersion,
        params: &ConsensusParams,
    ) -> Result<DifficultyParts, CompactError> {
        match version {
            PowVersion::Legacy => {
                let value = self.expand_legacy()?;
                let minimum = u64::from(params.legacy_min_difficulty);
                let maximum = u64::from(MAX_DIFFICULTY_BITS);
                let difficulty = value.to_u64().unwrap_or(u64::MAX);
                if difficulty < minimum {
                    return Err(CompactError::TooEasy { difficulty, minimum });
                }
                if difficulty > maximum {
                    return Err(CompactError::TooHard { difficulty, maximum });
                }
                Ok(DifficultyParts {
                    integer: difficulty as u32,
                    fraction: 0,
                })
            }
            PowVersion::Current => {
                let difficulty = u64::from(self.0);
                let minimum = u64::from(params.min_difficulty) << 8;
                let maximum = u64::from(MAX_DIFFICULTY_BITS) << 8;
                if difficulty < minimum {
                    return Err(CompactError::TooEasy { difficulty, minimum });
                }
                if difficulty > maximum {
                    return Err(CompactError::TooHard { difficulty, maximum });
                }
                Ok(DifficultyParts {
                    integer: self.0 >> 8,
                    fraction: (self.0 & 0xff) as u8,
                })
            }
        }
    }

    /// Fixed-point difficulty for a block of the given version.
    ///
    /// Legacy values are only checked for encoding errors, not for range.
    pub fn to_fixed(self, version: PowVersion) -> Result<FixedPointDifficulty, CompactError> {
        match version {
            PowVersion::Legacy => {
                let value = self.expand_legacy()?;
                let maximum = u64::from(MAX_DIFFICULTY_BITS);
                let difficulty = value.to_u64().unwrap_or(u64::MAX);
                if difficulty > maximum {
                    return Err(CompactError::TooHard { difficulty, maximum });
                }
                Ok(FixedPointDifficulty(difficulty << FRACTION_BITS))
            }
            PowVersion::Current => {
                let difficulty = u64::from(self.0);
                let maximum = (u64::from(MAX_DIFFICULTY_BITS) << 8) | 0xff;
                if difficulty > maximum {
                    return Err(CompactError::TooHard { difficulty, maximum });
                }
                Ok(FixedPointDifficulty(difficulty << COMPACT_TO_FIXED_SHIFT))
            }
        }
    }
}

/// Difficulty with an implicit 2^48 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPointDifficulty(pub u64);

impl FixedPointDifficulty {
    /// Whole-number difficulty.
    pub fn from_integer(integer: u32) -> Self {
        FixedPointDifficulty(u64::from(integer) << FRACTION_BITS)
    }

    /// Integer part.
    #[inline]
    pub fn integer_part(self) -> u32 {
        (self.0 >> FRACTION_BITS) as u32
    }

    /// Encode in the given compact form.
    ///
    /// Current encoding rounds to the nearest 1/256; legacy truncates to an integer.
    pub fn to_compact(self, version: PowVersion) -> CompactDifficulty {
        match version {
            PowVersion::Current => {
                let half = 1u64 << (COMPACT_TO_FIXED_SHIFT - 1);
                let rounded = self.0.saturating_add(half) >> COMPACT_TO_FIXED_SHIFT;
                CompactDifficulty(rounded.min(u64::from(u32::MAX)) as u32)
            }
            PowVersion::Legacy => {
                CompactDifficulty::legacy_from_value(&BigUint::from(self.integer_part()))
            }
        }
    }

    /// Approximate value, for display.
    #[inline]
    pub fn to_f64(self) -> f64 {
        fixed::to_f64(self.0)
    }
}

impl std::fmt::Display for FixedPointDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_difficulty(self.to_f64()))
    }
}

/// One adjustment step.
///
/// Moves the difficulty by `(ln(target_spacing) - ln(actual)) >> shift`, with
/// shift 8 when rising and 6 when falling, by at most 1.0 either way, and never
/// below the chain minimum. An `actual_timespan` of 0 counts as 1 second.
pub fn next_difficulty(
    current: FixedPointDifficulty,
    actual_timespan: u64,
    params: &ConsensusParams,
) -> FixedPointDifficulty {
    let minimum = params.min_difficulty_fixed();
    let log_target = params.log_target_spacing;
    let log_actual = ln_fixed_u64(actual_timespan.max(1));
    let difficulty = current.0;

    let mut next = if log_target >= log_actual {
        let step = (log_target - log_actual) >> INCREASE_SHIFT;
        difficulty.saturating_add(step.min(TWO_POW48))
    } else {
        let step = (log_actual - log_target) >> DECREASE_SHIFT;
        difficulty
            .checked_sub(step.min(TWO_POW48))
            .unwrap_or(minimum)
    };

    if next < minimum {
        next = minimum;
    }
    FixedPointDifficulty(next)
}

/// Lowest difficulty reachable after `elapsed` seconds without a block.
///
/// Each full window of target spacings can lower the difficulty by at most 1.0.
pub fn max_difficulty_decrease(
    difficulty: FixedPointDifficulty,
    elapsed: i64,
    params: &ConsensusParams,
) -> FixedPointDifficulty {
    let minimum = params.min_difficulty_fixed();
    let window_seconds = (params.adjustment_window * params.target_spacing) as i64;
    let mut remaining = elapsed;
    let mut value = difficulty.0;

    while remaining > 0 && value > minimum {
        value = value.saturating_sub(TWO_POW48);
        remaining -= window_seconds;
    }

    FixedPointDifficulty(value.max(minimum))
}

/// What the adjuster needs to know about a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    /// Height in the chain.
    pub height: u64,
    /// Block timestamp (Unix time).
    pub timestamp: u64,
    /// Compact difficulty of the block.
    pub bits: CompactDifficulty,
}

/// Read access to the ancestors of a chain tip.
pub trait ChainView {
    /// The block at `height` on this chain, if known.
    fn ancestor(&self, height: u64) -> Option<BlockSummary>;
}

/// A slice indexed by height.
impl ChainView for [BlockSummary] {
    fn ancestor(&self, height: u64) -> Option<BlockSummary> {
        let index = usize::try_from(height).ok()?;
        self.get(index).copied()
    }
}

impl ChainView for Vec<BlockSummary> {
    fn ancestor(&self, height: u64) -> Option<BlockSummary> {
        self.as_slice().ancestor(height)
    }
}

/// Errors raised by [`next_work_required`]. Never replaced by a default difficulty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdjustmentError {
    #[error("ancestor at height {0} is missing")]
    MissingAncestor(u64),

    #[error("ancestor lookup for height {expected} returned height {found}")]
    InconsistentAncestor { expected: u64, found: u64 },

    #[error("invalid difficulty at height {height}: {source}")]
    InvalidDifficulty {
        height: u64,
        #[source]
        source: CompactError,
    },
}

fn fetch_ancestor<C: ChainView + ?Sized>(chain: &C, height: u64) -> Result<BlockSummary, AdjustmentError> {
    let block = chain
        .ancestor(height)
        .ok_or(AdjustmentError::MissingAncestor(height))?;
    if block.height != height {
        return Err(AdjustmentError::InconsistentAncestor {
            expected: height,
            found: block.height,
        });
    }
    Ok(block)
}

/// Linearly weighted average of the last `min(window, height)` block spans.
///
/// Each span is clamped to `[1, 12 * target_spacing]`; the newest span has the
/// largest weight.
pub fn weighted_timespan<C: ChainView + ?Sized>(
    last: &BlockSummary,
    chain: &C,
    params: &ConsensusParams,
) -> Result<u64, AdjustmentError> {
    let window = params.adjustment_window.min(last.height);
    let max_span = params.max_span() as i64;

    let mut newer = *last;
    let mut weighted_sum: u128 = 0;
    let mut weight_total: u128 = 0;

    for i in 0..window {
        let older = fetch_ancestor(chain, last.height - i - 1)?;
        let span = (newer.timestamp as i64 - older.timestamp as i64).clamp(1, max_span);
        let weight = u128::from(window - i);
        weighted_sum += span as u128 * weight;
        weight_total += weight;
        newer = older;
    }

    if weight_total == 0 {
        return Ok(params.target_spacing);
    }
    Ok((weighted_sum / weight_total) as u64)
}

/// Compact difficulty required for the block after `last`.
///
/// The window is read from `chain`; the result uses the encoding active at
/// `last.height + 1`.
///
/// Each step starts again from the rounded compact value, so moves smaller
/// than 1/512 vanish. Under current encoding the difficulty therefore holds
/// still while blocks come up to about 1.65x faster than the target spacing
/// (`ln` ratio below 0.5 with the rise shift of 8), or up to about 1.13x
/// slower (`ln` ratio below 0.125 with the fall shift of 6).
pub fn next_work_required<C: ChainView + ?Sized>(
    last: &BlockSummary,
    chain: &C,
    params: &ConsensusParams,
) -> Result<CompactDifficulty, AdjustmentError> {
    if last.height == 0 || params.no_retargeting {
        return Ok(last.bits);
    }

    let current = last
        .bits
        .to_fixed(params.pow_version_at(last.height))
        .map_err(|source| AdjustmentError::InvalidDifficulty {
            height: last.height,
            source,
        })?;

    let timespan = weighted_timespan(last, chain, params)?;
    let next = next_difficulty(current, timespan, params);

    log::debug!(
        "retarget at height {}: timespan {}s, {} -> {}",
        last.height + 1,
        timespan,
        current,
        next
    );

    Ok(next.to_compact(params.pow_version_at(last.height + 1)))
}

/// Human-readable difficulty of a compact value, for display.
pub fn readable_difficulty(bits: CompactDifficulty, version: PowVersion) -> f64 {
    bits.to_fixed(version).map(FixedPointDifficulty::to_f64).unwrap_or(0.0)
}

/// Format difficulty for display (e.g., "600.250").
pub fn format_difficulty(difficulty: f64) -> String {
    if difficulty >= 1e6 {
        format!("{:.2}M", difficulty / 1e6)
    } else if difficulty >= 1e4 {
        format!("{:.2}K", difficulty / 1e3)
    } else {
        format!("{:.3}", difficulty)
    }
}

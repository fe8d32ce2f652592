//! Constellation patterns and the two-pass verifier.

use std::borrow::Cow;

use num_bigint::BigUint;
use thiserror::Error;

use crate::primality::{is_probable_prime, is_probable_prime_quick};

/// Errors raised when building a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern must start with 0, found {0}")]
    FirstNotZero(u32),

    #[error("pattern members cover every residue modulo {0}")]
    Inadmissible(u32),
}

/// A constellation shape, stored as gaps between consecutive members.
///
/// The first gap is always 0, so the first member is the candidate itself.
/// For example `[0, 4, 2, 4, 2, 4]` is the sextuplet `n, n+4, n+6, n+10, n+12, n+16`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AcceptedPattern {
    gaps: Cow<'static, [u32]>,
}

impl AcceptedPattern {
    /// Pattern from owned gaps.
    pub fn new(gaps: Vec<u32>) -> Result<Self, PatternError> {
        Self::validate(&gaps)?;
        Ok(AcceptedPattern {
            gaps: Cow::Owned(gaps),
        })
    }

    /// Pattern borrowing static gaps, as held by consensus parameters.
    pub fn from_static(gaps: &'static [u32]) -> Result<Self, PatternError> {
        Self::validate(gaps)?;
        Ok(AcceptedPattern {
            gaps: Cow::Borrowed(gaps),
        })
    }

    fn validate(gaps: &[u32]) -> Result<(), PatternError> {
        match gaps.first() {
            None => Err(PatternError::Empty),
            Some(&0) => Ok(()),
            Some(&first) => Err(PatternError::FirstNotZero(first)),
        }
    }

    /// Gaps between consecutive members.
    #[inline]
    pub fn gaps(&self) -> &[u32] {
        &self.gaps
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    /// Always false; patterns hold at least one member.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Offsets of each member from the first one.
    pub fn offsets(&self) -> Vec<u64> {
        self.gaps
            .iter()
            .scan(0u64, |acc, &gap| {
                *acc += u64::from(gap);
                Some(*acc)
            })
            .collect()
    }

    /// Distance from the first member to the last.
    pub fn span(&self) -> u64 {
        self.gaps.iter().map(|&g| u64::from(g)).sum()
    }

    /// Check that no prime up to the pattern length is forced to divide a member.
    pub fn check_admissible(&self, primes: &[u32]) -> Result<(), PatternError> {
        let offsets = self.offsets();
        for &p in primes.iter().take_while(|&&p| p as usize <= offsets.len()) {
            let mut covered = vec![false; p as usize];
            for &offset in &offsets {
                covered[(offset % u64::from(p)) as usize] = true;
            }
            if covered.iter().all(|&c| c) {
                return Err(PatternError::Inadmissible(p));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for AcceptedPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let offsets: Vec<String> = self.offsets().iter().map(u64::to_string).collect();
        write!(f, "({})", offsets.join(", "))
    }
}

/// How hard each member is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rigor {
    /// Trial division and Miller-Rabin base 2.
    Quick,
    /// Full Baillie-PSW.
    Full,
}

/// Result of checking a candidate against one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyResult {
    /// Every member is prime.
    pub accepted: bool,
    /// Members found prime before the first failure.
    pub tuple_length: u32,
}

/// Count the leading members of `pattern`, starting at `candidate`, that test prime.
pub fn tuple_length(candidate: &BigUint, pattern: &AcceptedPattern, rigor: Rigor) -> u32 {
    let mut member = candidate.clone();
    let mut length = 0;
    for &gap in pattern.gaps() {
        member += gap;
        let prime = match rigor {
            Rigor::Quick => is_probable_prime_quick(&member),
            Rigor::Full => is_probable_prime(&member),
        };
        if !prime {
            break;
        }
        length += 1;
    }
    length
}

/// Check `candidate` against `pattern`.
///
/// A quick pass rejects most composites cheaply; only a complete quick match is
/// walked again with the full test.
pub fn verify(candidate: &BigUint, pattern: &AcceptedPattern) -> VerifyResult {
    let full_length = pattern.len() as u32;

    let quick = tuple_length(candidate, pattern, Rigor::Quick);
    if quick != full_length {
        return VerifyResult {
            accepted: false,
            tuple_length: quick,
        };
    }

    let full = tuple_length(candidate, pattern, Rigor::Full);
    VerifyResult {
        accepted: full == full_length,
        tuple_length: full,
    }
}

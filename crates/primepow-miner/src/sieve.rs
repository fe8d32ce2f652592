//! Segmented sieve over primorial multipliers.
//!
//! For a sieving prime `p` and a pattern offset `o`, the member
//! `base + o + k * P` is divisible by `p` exactly when
//! `k = -(base + o) * P^-1 (mod p)`. Those roots are computed once per plan;
//! each segment then crosses off every root's progression within its range.

use num_bigint::BigUint;

use crate::plan::{mod_inverse, residue, OffsetPlan};
use primepow_core::primes::PrimeTable;

/// Precomputed sieving primes and their roots.
#[derive(Debug, Clone)]
pub struct SieveSetup {
    primes: Vec<u32>,
    /// `stride` roots per prime, in prime order.
    roots: Vec<u32>,
    stride: usize,
}

impl SieveSetup {
    /// Roots for the table primes past the plan's primorial, up to `sieve_primes` table entries.
    pub fn new(plan: &OffsetPlan, table: &PrimeTable, sieve_primes: usize) -> Self {
        let end = sieve_primes.min(table.len());
        let start = usize::from(plan.primorial_number).min(end);
        Self::from_parts(
            &plan.base,
            &plan.primorial,
            &plan.pattern.offsets(),
            &table.as_slice()[start..end],
        )
    }

    /// Roots of `base + offset + k * step` for each prime.
    ///
    /// Primes dividing `step` are skipped: they divide either every member or none.
    pub fn from_parts(base: &BigUint, step: &BigUint, offsets: &[u64], primes: &[u32]) -> Self {
        let stride = offsets.len();
        let mut kept = Vec::with_capacity(primes.len());
        let mut roots = Vec::with_capacity(primes.len() * stride);

        for &p in primes {
            let p64 = u64::from(p);
            let Some(inverse) = mod_inverse(residue(step, p), p64) else {
                continue;
            };
            let base_mod = residue(base, p);
            kept.push(p);
            for &offset in offsets {
                let member = (base_mod + offset % p64) % p64;
                let root = (p64 - member) % p64 * inverse % p64;
                roots.push(root as u32);
            }
        }

        SieveSetup {
            primes: kept,
            roots,
            stride,
        }
    }

    /// Number of sieving primes.
    pub fn prime_count(&self) -> usize {
        self.primes.len()
    }

    /// Largest sieving prime, if any.
    pub fn largest_prime(&self) -> Option<u32> {
        self.primes.last().copied()
    }
}

/// Bitset over a range of multipliers. A set bit marks a multiplier with a
/// member divisible by some sieving prime.
///
/// Owned by one worker and reused for every segment it sieves.
#[derive(Debug, Clone)]
pub struct Segment {
    start: u64,
    len: usize,
    words: Vec<u64>,
}

impl Segment {
    /// Empty segment able to hold `capacity` multipliers without reallocating.
    pub fn new(capacity: usize) -> Self {
        Segment {
            start: 0,
            len: 0,
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// First multiplier covered.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Multipliers covered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reset(&mut self, start: u64, len: usize) {
        let words = len.div_ceil(64);
        if self.words.len() < words {
            self.words.resize(words, 0);
        }
        self.words.fill(0);
        self.start = start;
        self.len = len;
    }

    #[inline]
    fn mark(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Whether the multiplier at `index` within the segment was crossed off.
    #[inline]
    pub fn is_marked(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Multipliers that survived, in ascending order.
    pub fn survivors(&self) -> impl Iterator<Item = u64> + '_ {
        let start = self.start;
        let len = self.len;
        self.words.iter().enumerate().flat_map(move |(w, &word)| {
            let valid = len.saturating_sub(w * 64).min(64);
            let mask = if valid == 64 { !0u64 } else { (1u64 << valid) - 1 };
            let mut free = !word & mask;
            std::iter::from_fn(move || {
                if free == 0 {
                    return None;
                }
                let bit = free.trailing_zeros() as usize;
                free &= free - 1;
                Some(start + (w * 64 + bit) as u64)
            })
        })
    }

    /// Number of surviving multipliers.
    pub fn survivor_count(&self) -> usize {
        self.len - self.words.iter().map(|w| w.count_ones() as usize).sum::<usize>()
    }
}

/// Sieve multipliers `start..start + len` into `segment`.
pub fn sieve_segment(setup: &SieveSetup, segment: &mut Segment, start: u64, len: usize) {
    segment.reset(start, len);
    if setup.stride == 0 {
        return;
    }
    for (&p, roots) in setup.primes.iter().zip(setup.roots.chunks(setup.stride)) {
        let p64 = u64::from(p);
        let shift = start % p64;
        for &root in roots {
            let mut index = ((u64::from(root) + p64 - shift) % p64) as usize;
            while index < len {
                segment.mark(index);
                index += p as usize;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn brute_force_survivors(
        base: &BigUint,
        step: &BigUint,
        offsets: &[u64],
        primes: &[u32],
        range: std::ops::Range<u64>,
    ) -> Vec<u64> {
        range
            .filter(|&k| {
                offsets.iter().all(|&o| {
                    let member = base + o + step * k;
                    primes
                        .iter()
                        .filter(|&&p| !(step % p).is_zero())
                        .all(|&p| !(&member % p).is_zero())
                })
            })
            .collect()
    }

    #[test]
    fn test_matches_brute_force() {
        let base = (BigUint::from(1u32) << 300u32) + 7u32;
        let step = BigUint::from(30u32);
        let offsets = [0u64, 4, 6, 10, 12, 16];
        let primes = [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
        let setup = SieveSetup::from_parts(&base, &step, &offsets, &primes);
        assert_eq!(setup.prime_count(), 9);
        assert_eq!(setup.largest_prime(), Some(37));

        let mut segment = Segment::new(256);
        sieve_segment(&setup, &mut segment, 0, 200);
        let survivors: Vec<u64> = segment.survivors().collect();
        assert_eq!(survivors, brute_force_survivors(&base, &step, &offsets, &primes, 0..200));
        assert_eq!(segment.survivor_count(), survivors.len());
        assert!(!survivors.is_empty());
    }

    #[test]
    fn test_segments_agree_with_one_pass() {
        let base = (BigUint::from(1u32) << 288u32) + 1u32;
        let step = BigUint::from(210u32);
        let offsets = [0u64, 2, 6];
        let primes: Vec<u32> = PrimeTable::global().as_slice()[4..200].to_vec();
        let setup = SieveSetup::from_parts(&base, &step, &offsets, &primes);

        let mut whole = Segment::new(1024);
        sieve_segment(&setup, &mut whole, 1000, 1000);
        let expected: Vec<u64> = whole.survivors().collect();

        let mut piece = Segment::new(128);
        let mut pieces = Vec::new();
        for start in (1000..2000).step_by(128) {
            let len = (2000 - start).min(128) as usize;
            sieve_segment(&setup, &mut piece, start, len);
            assert_eq!(piece.start(), start);
            pieces.extend(piece.survivors());
        }
        assert_eq!(pieces, expected);
    }

    #[test]
    fn test_segment_reuse_clears_marks() {
        let base = BigUint::from(1_000_003u32);
        let step = BigUint::from(2u32);
        let setup = SieveSetup::from_parts(&base, &step, &[0], &[3, 5, 7]);

        let mut segment = Segment::new(64);
        sieve_segment(&setup, &mut segment, 0, 64);
        let first = segment.survivor_count();
        sieve_segment(&setup, &mut segment, 0, 10);
        assert_eq!(segment.len(), 10);
        assert!(segment.survivor_count() <= 10);
        assert!(segment.survivors().all(|k| k < 10));
        sieve_segment(&setup, &mut segment, 0, 64);
        assert_eq!(segment.survivor_count(), first);
    }

    #[test]
    fn test_partial_last_word() {
        let setup = SieveSetup::from_parts(&BigUint::from(1u32), &BigUint::from(1u32), &[0], &[]);
        let mut segment = Segment::new(64);
        sieve_segment(&setup, &mut segment, 500, 70);
        let survivors: Vec<u64> = segment.survivors().collect();
        assert_eq!(survivors, (500..570).collect::<Vec<u64>>());
        assert!(!segment.is_marked(69));
    }

    #[test]
    fn test_setup_from_plan_skips_primorial_primes() {
        use primepow_core::block::{BlockHeader, PowVersion};
        use primepow_core::constellation::AcceptedPattern;
        use primepow_core::difficulty::CompactDifficulty;
        use primepow_core::network::Network;

        let header = BlockHeader::new(
            0x2000_0000,
            [1; 32],
            [2; 32],
            1_707_684_704,
            CompactDifficulty::from_parts(288, 0),
        );
        let table = PrimeTable::global();
        let plan = OffsetPlan::new(
            &header,
            PowVersion::Current,
            Network::Regtest.params(),
            AcceptedPattern::new(vec![0]).unwrap(),
            None,
            table,
        )
        .unwrap();
        let setup = SieveSetup::new(&plan, table, 1000);
        assert_eq!(setup.prime_count(), 997);
        assert_eq!(setup.largest_prime(), table.get(999));

        let mut segment = Segment::new(4096);
        sieve_segment(&setup, &mut segment, 0, 4096);
        for k in segment.survivors().take(50) {
            let candidate = plan.candidate(k);
            for &p in &table.as_slice()[..1000] {
                assert!(!(&candidate % p).is_zero());
            }
        }
    }
}

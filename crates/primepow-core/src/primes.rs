//! Small prime tables shared by the primality oracle, the target codec and the sieve.

use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::One;

/// The 168 primes below 1000, used for trial division.
pub const SMALL_PRIMES: [u32; 168] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53,
    59, 61, 67, 71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113,
    127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181,
    191, 193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
    257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397,
    401, 409, 419, 421, 431, 433, 439, 443, 449, 457, 461, 463,
    467, 479, 487, 491, 499, 503, 509, 521, 523, 541, 547, 557,
    563, 569, 571, 577, 587, 593, 599, 601, 607, 613, 617, 619,
    631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787,
    797, 809, 811, 821, 823, 827, 829, 839, 853, 857, 859, 863,
    877, 881, 883, 887, 907, 911, 919, 929, 937, 941, 947, 953,
    967, 971, 977, 983, 991, 997,
];

/// Number of primes held by the process-wide table.
pub const PRIME_TABLE_SIZE: usize = 65_536;

/// Upper bound that contains the first [`PRIME_TABLE_SIZE`] primes (the last one is 821641).
const PRIME_TABLE_LIMIT: usize = 821_642;

static GLOBAL_TABLE: LazyLock<PrimeTable> = LazyLock::new(|| PrimeTable::new(PRIME_TABLE_SIZE));

/// Ascending list of the first primes, immutable after construction.
#[derive(Debug, Clone)]
pub struct PrimeTable {
    primes: Vec<u32>,
}

impl PrimeTable {
    /// Build a table holding the first `count` primes (at most [`PRIME_TABLE_SIZE`]).
    pub fn new(count: usize) -> Self {
        let count = count.min(PRIME_TABLE_SIZE);
        let mut composite = vec![false; PRIME_TABLE_LIMIT];
        let mut primes = Vec::with_capacity(count);

        let mut n = 2usize;
        while primes.len() < count && n < PRIME_TABLE_LIMIT {
            if !composite[n] {
                primes.push(n as u32);
                let mut multiple = n * n;
                while multiple < PRIME_TABLE_LIMIT {
                    composite[multiple] = true;
                    multiple += n;
                }
            }
            n += 1;
        }

        PrimeTable { primes }
    }

    /// The shared table of the first 65536 primes, built on first use.
    pub fn global() -> &'static PrimeTable {
        &GLOBAL_TABLE
    }

    /// All primes in ascending order.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.primes
    }

    /// Number of primes in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.primes.len()
    }

    /// Whether the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    /// The `index`-th prime (0-based), if present.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u32> {
        self.primes.get(index).copied()
    }

    /// Product of the first `count` primes.
    ///
    /// Returns `None` when the table holds fewer than `count` primes.
    pub fn primorial(&self, count: usize) -> Option<BigUint> {
        let primes = self.primes.get(..count)?;
        Some(primes.iter().fold(BigUint::one(), |acc, &p| acc * p))
    }

    /// Product of the first `count` primes, giving up as soon as it exceeds `limit`.
    ///
    /// Returns `None` if the product would exceed `limit` or the table is too short.
    pub fn primorial_bounded(&self, count: usize, limit: &BigUint) -> Option<BigUint> {
        let primes = self.primes.get(..count)?;
        let mut product = BigUint::one();
        for &p in primes {
            product *= p;
            if &product > limit {
                return None;
            }
        }
        Some(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_primes_are_prefix_of_table() {
        let table = PrimeTable::new(200);
        assert_eq!(&table.as_slice()[..168], &SMALL_PRIMES[..]);
        assert_eq!(table.get(168), Some(1009));
    }

    #[test]
    fn test_global_table_size_and_last_prime() {
        let table = PrimeTable::global();
        assert_eq!(table.len(), PRIME_TABLE_SIZE);
        assert_eq!(table.get(0), Some(2));
        assert_eq!(table.get(PRIME_TABLE_SIZE - 1), Some(821_641));
        assert!(table.as_slice().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_primorial() {
        let table = PrimeTable::new(16);
        assert_eq!(table.primorial(0), Some(BigUint::one()));
        assert_eq!(table.primorial(4), Some(BigUint::from(210u32)));
        assert_eq!(table.primorial(9), Some(BigUint::from(223_092_870u64)));
        assert_eq!(table.primorial(17), None);
    }

    #[test]
    fn test_primorial_bounded() {
        let table = PrimeTable::new(16);
        let limit = BigUint::from(1u64 << 23);
        assert_eq!(table.primorial_bounded(7, &limit), Some(BigUint::from(510_510u32)));
        assert_eq!(table.primorial_bounded(8, &limit), None);
    }
}

//! Deterministic primality oracle (Baillie-PSW).
//!
//! Everything here is built from primitive big-integer operations
//! (`modpow`, division, shifts, integer square root). The answers depend only on
//! the input, never on a library's own prime heuristics, so every node agrees.

use num_bigint::BigUint;
use num_integer::{Integer, Roots};
use num_traits::{One, ToPrimitive, Zero};

use crate::primes::SMALL_PRIMES;

/// Largest Selfridge `|D|` searched before giving up and calling `n` composite.
const SELFRIDGE_SEARCH_LIMIT: u64 = 1_000_000;

/// Outcome of trial division by [`SMALL_PRIMES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialDivision {
    /// `n` is one of the small primes.
    Prime,
    /// `n` has a small factor (or is below 2).
    Composite,
    /// No small factor found; a stronger test is needed.
    Undecided,
}

/// Lowest 64 bits of `n`.
#[inline]
fn low_u64(n: &BigUint) -> u64 {
    n.iter_u64_digits().next().unwrap_or(0)
}

/// Trial division by the 168 primes below 1000.
pub fn trial_division(n: &BigUint) -> TrialDivision {
    if let Some(small) = n.to_u64() {
        if small < 2 {
            return TrialDivision::Composite;
        }
        for &p in SMALL_PRIMES.iter() {
            let p = u64::from(p);
            if small == p {
                return TrialDivision::Prime;
            }
            if small % p == 0 {
                return TrialDivision::Composite;
            }
        }
        return TrialDivision::Undecided;
    }

    if n.is_even() {
        return TrialDivision::Composite;
    }
    for &p in SMALL_PRIMES[1..].iter() {
        if (n % p).is_zero() {
            return TrialDivision::Composite;
        }
    }
    TrialDivision::Undecided
}

/// Strong Miller-Rabin probable-prime test to base 2.
///
/// `n` must be odd and greater than 2; other inputs return `false`.
pub fn miller_rabin_base2(n: &BigUint) -> bool {
    if n <= &BigUint::from(2u32) || n.is_even() {
        return false;
    }

    let n_minus_1 = n - 1u32;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;

    let mut x = BigUint::from(2u32).modpow(&d, n);
    if x.is_one() || x == n_minus_1 {
        return true;
    }
    for _ in 1..s {
        x = (&x * &x) % n;
        if x == n_minus_1 {
            return true;
        }
        if x.is_one() {
            return false;
        }
    }
    false
}

/// Fermat probable-prime test to base 2: `2^(n-1) ≡ 1 (mod n)`.
///
/// This is what an accelerator pre-filter computes; it is a hint only.
pub fn fermat_base2(n: &BigUint) -> bool {
    if n < &BigUint::from(2u32) {
        return false;
    }
    if n == &BigUint::from(2u32) {
        return true;
    }
    let exponent = n - 1u32;
    BigUint::from(2u32).modpow(&exponent, n).is_one()
}

/// Jacobi symbol `(a / n)` for odd positive `n`. Returns -1, 0 or 1.
pub fn jacobi(a: i64, n: &BigUint) -> i32 {
    if n.is_zero() || n.is_even() {
        return 0;
    }

    let magnitude = BigUint::from(a.unsigned_abs()) % n;
    let mut a = if a < 0 && !magnitude.is_zero() {
        n - magnitude
    } else {
        magnitude
    };
    let mut n = n.clone();
    let mut result = 1i32;

    while !a.is_zero() {
        let twos = a.trailing_zeros().unwrap_or(0);
        if twos > 0 {
            a >>= twos;
            let n_mod_8 = low_u64(&n) & 7;
            if twos % 2 == 1 && (n_mod_8 == 3 || n_mod_8 == 5) {
                result = -result;
            }
        }
        if low_u64(&a) & 3 == 3 && low_u64(&n) & 3 == 3 {
            result = -result;
        }
        std::mem::swap(&mut a, &mut n);
        a %= &n;
    }

    if n.is_one() {
        result
    } else {
        0
    }
}

/// Selfridge "Method A": first `D` in 5, -7, 9, -11, ... with `(D / n) = -1`.
///
/// Returns `None` when a zero Jacobi symbol exposes a proper factor of `n`.
fn selfridge_d(n: &BigUint) -> Option<i64> {
    let mut d: i64 = 5;
    loop {
        match jacobi(d, n) {
            -1 => return Some(d),
            0 if n.to_u64() != Some(d.unsigned_abs()) => return None,
            _ => {}
        }
        let next_magnitude = d.unsigned_abs() + 2;
        if next_magnitude > SELFRIDGE_SEARCH_LIMIT {
            return None;
        }
        let next_magnitude = next_magnitude as i64;
        d = if d > 0 { -next_magnitude } else { next_magnitude };
    }
}

/// Reduce a signed small integer into `[0, n)`.
fn signed_mod(value: i64, n: &BigUint) -> BigUint {
    let magnitude = BigUint::from(value.unsigned_abs()) % n;
    if value < 0 && !magnitude.is_zero() {
        n - magnitude
    } else {
        magnitude
    }
}

/// `value / 2 (mod n)` for odd `n` and `value` in `[0, n)`.
fn halve_mod(value: BigUint, n: &BigUint) -> BigUint {
    if value.is_odd() {
        (value + n) >> 1u32
    } else {
        value >> 1u32
    }
}

/// `V^2 - 2Q (mod n)` with every operand already reduced.
fn double_v(v: &BigUint, q: &BigUint, n: &BigUint) -> BigUint {
    let twice_q = (q << 1u32) % n;
    ((v * v) + n - twice_q) % n
}

/// Strong Lucas probable-prime test with Selfridge parameters `P = 1`, `Q = (1 - D) / 4`.
///
/// `n` must be odd and greater than 2; other inputs return `false`.
pub fn strong_lucas_selfridge(n: &BigUint) -> bool {
    if n <= &BigUint::from(2u32) || n.is_even() {
        return false;
    }

    let root = n.sqrt();
    if &(&root * &root) == n {
        return false;
    }

    let Some(d_param) = selfridge_d(n) else {
        return false;
    };
    let q_param = (1 - d_param) / 4;

    let d_mod = signed_mod(d_param, n);
    let q_mod = signed_mod(q_param, n);

    let n_plus_1 = n + 1u32;
    let s = n_plus_1.trailing_zeros().unwrap_or(0);
    let d = &n_plus_1 >> s;

    // P = 1 throughout, so P·U and P·V are just U and V.
    let mut u = BigUint::one();
    let mut v = BigUint::one();
    let mut q_k = q_mod.clone();

    for bit in (0..d.bits().saturating_sub(1)).rev() {
        u = (&u * &v) % n;
        v = double_v(&v, &q_k, n);
        q_k = (&q_k * &q_k) % n;

        if d.bit(bit) {
            let next_u = halve_mod((&u + &v) % n, n);
            let next_v = halve_mod(((&d_mod * &u) + &v) % n, n);
            u = next_u;
            v = next_v;
            q_k = (&q_k * &q_mod) % n;
        }
    }

    if u.is_zero() || v.is_zero() {
        return true;
    }
    for _ in 1..s {
        v = double_v(&v, &q_k, n);
        if v.is_zero() {
            return true;
        }
        q_k = (&q_k * &q_k) % n;
    }
    false
}

/// Full deterministic test: trial division, Miller-Rabin base 2, strong Lucas.
pub fn is_probable_prime(n: &BigUint) -> bool {
    match trial_division(n) {
        TrialDivision::Prime => true,
        TrialDivision::Composite => false,
        TrialDivision::Undecided => miller_rabin_base2(n) && strong_lucas_selfridge(n),
    }
}

/// Cheap first-pass test: trial division and Miller-Rabin base 2 only.
///
/// Never rejects a prime; may accept a base-2 strong pseudoprime.
pub fn is_probable_prime_quick(n: &BigUint) -> bool {
    match trial_division(n) {
        TrialDivision::Prime => true,
        TrialDivision::Composite => false,
        TrialDivision::Undecided => miller_rabin_base2(n),
    }
}

/// Smallest probable prime strictly greater than `n`.
pub fn next_prime(n: &BigUint) -> BigUint {
    if n < &BigUint::from(2u32) {
        return BigUint::from(2u32);
    }

    let mut candidate = n + 1u32;
    if candidate.is_even() {
        candidate += 1u32;
    }
    loop {
        if trial_division(&candidate) != TrialDivision::Composite && is_probable_prime(&candidate) {
            return candidate;
        }
        candidate += 2u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    fn pow2(exp: u32) -> BigUint {
        BigUint::one() << exp
    }

    fn is_prime_by_division(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut d = 2u64;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 1;
        }
        true
    }

    #[test]
    fn test_small_values() {
        assert!(!is_probable_prime(&big(0)));
        assert!(!is_probable_prime(&big(1)));
        assert!(is_probable_prime(&big(2)));
        assert!(is_probable_prime(&big(3)));
        assert!(!is_probable_prime(&big(4)));
        assert!(is_probable_prime(&big(997)));
        assert!(!is_probable_prime(&big(999)));
        assert!(is_probable_prime(&big(1009)));
        assert!(!is_probable_prime(&big(1_018_081)));
    }

    #[test]
    fn test_agrees_with_trial_division_below_200k() {
        for n in 0..200_000u64 {
            assert_eq!(
                is_probable_prime(&big(n)),
                is_prime_by_division(n),
                "mismatch at {}",
                n
            );
        }
    }

    /// Exhaustive check up to 10^7; slow in debug builds.
    #[test]
    #[ignore]
    fn test_agrees_with_sieve_below_ten_million() {
        const LIMIT: usize = 10_000_000;
        let mut composite = vec![false; LIMIT];
        composite[0] = true;
        composite[1] = true;
        let mut i = 2;
        while i * i < LIMIT {
            if !composite[i] {
                let mut j = i * i;
                while j < LIMIT {
                    composite[j] = true;
                    j += i;
                }
            }
            i += 1;
        }
        for (n, &is_composite) in composite.iter().enumerate() {
            assert_eq!(is_probable_prime(&big(n as u64)), !is_composite, "mismatch at {}", n);
        }
    }

    #[test]
    fn test_known_large_primes() {
        let primes = [
            pow2(127) - 1u32,
            pow2(521) - 1u32,
            pow2(303) + 101u32,
            pow2(302) + 307u32,
            pow2(264) + 175u32,
            pow2(256) + 297u32,
        ];
        for p in primes.iter() {
            assert!(is_probable_prime(p), "{} should be prime", p);
            assert!(is_probable_prime_quick(p));
            assert!(fermat_base2(p));
        }
    }

    #[test]
    fn test_pseudoprimes_and_carmichaels_rejected() {
        let composites: [u64; 21] = [
            2047, 3277, 4033, 4681, 8321, // strong base-2 pseudoprimes
            5459, 5777, 10877, 16109, 18971, // strong Lucas pseudoprimes
            561, 1105, 1729, 2465, 2821, 6601, 8911, 41041, // Carmichael numbers
            994_009, 1_018_081, // squares of primes
            3_825_123_056_546_413_051,
        ];
        for &c in composites.iter() {
            assert!(!is_probable_prime(&big(c)), "{} should be composite", c);
        }

        let large: [&str; 2] = ["318665857834031151167461", "3317044064679887385961981"];
        for digits in large.iter() {
            let n: BigUint = digits.parse().unwrap();
            assert!(!is_probable_prime(&n), "{} should be composite", digits);
        }
    }

    #[test]
    fn test_component_tests_on_pseudoprimes() {
        // Strong base-2 pseudoprimes pass Miller-Rabin but fail Lucas.
        for &c in [2047u64, 3277, 4033, 4681, 8321].iter() {
            assert!(miller_rabin_base2(&big(c)), "{} passes MR base 2", c);
            assert!(!strong_lucas_selfridge(&big(c)), "{} fails Lucas", c);
        }
        // Strong Lucas pseudoprimes pass Lucas but fail Miller-Rabin.
        for &c in [5459u64, 5777, 10877, 16109, 18971].iter() {
            assert!(strong_lucas_selfridge(&big(c)), "{} passes Lucas", c);
            assert!(!miller_rabin_base2(&big(c)), "{} fails MR base 2", c);
        }
        // Carmichael numbers fool Fermat.
        assert!(fermat_base2(&big(561)));
        assert!(!is_probable_prime(&big(561)));
    }

    #[test]
    fn test_quick_check_accepts_strong_pseudoprime() {
        assert!(is_probable_prime_quick(&big(2047)));
        assert!(!is_probable_prime(&big(2047)));
    }

    #[test]
    fn test_jacobi() {
        assert_eq!(jacobi(5, &big(21)), 1);
        assert_eq!(jacobi(-7, &big(21)), 0);
        assert_eq!(jacobi(2, &big(7)), 1);
        assert_eq!(jacobi(3, &big(7)), -1);
        assert_eq!(jacobi(-1, &big(7)), -1);
        assert_eq!(jacobi(-1, &big(13)), 1);
        assert_eq!(jacobi(1001, &big(9907)), -1);
        assert_eq!(jacobi(19, &big(45)), 1);
        assert_eq!(jacobi(8, &big(21)), -1);
        assert_eq!(jacobi(5, &big(10)), 0);
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(&big(0)), big(2));
        assert_eq!(next_prime(&big(1)), big(2));
        assert_eq!(next_prime(&big(2)), big(3));
        assert_eq!(next_prime(&big(3)), big(5));
        assert_eq!(next_prime(&big(996)), big(997));
        assert_eq!(next_prime(&big(997)), big(1009));
        assert_eq!(next_prime(&pow2(256)), pow2(256) + 297u32);
        assert_eq!(next_prime(&pow2(303)), pow2(303) + 101u32);
    }

    #[test]
    fn test_next_prime_leaves_no_gap_primes() {
        let mut n = 0u64;
        while n < 20_000 {
            let next = next_prime(&big(n)).to_u64().unwrap();
            assert!(is_prime_by_division(next));
            for between in (n + 1)..next {
                assert!(!is_prime_by_division(between), "{} skipped after {}", between, n);
            }
            n = next;
        }
    }
}

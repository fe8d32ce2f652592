//! Block-level proof-of-work check.

use num_bigint::BigUint;
use thiserror::Error;

use crate::block::{BlockHeader, PowVersion};
use crate::constellation::{verify, AcceptedPattern, PatternError};
use crate::network::ConsensusParams;
use crate::target::{decode, DecodeError};

/// Why a header's proof of work was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PowError {
    #[error("{found:?} proof of work is not valid at height {height} (expected {expected:?})")]
    VersionNotActive {
        height: u64,
        expected: PowVersion,
        found: PowVersion,
    },

    #[error("malformed proof of work: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid consensus pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("no accepted pattern satisfied (best tuple length {best_tuple_length})")]
    NoPatternSatisfied { best_tuple_length: u32 },
}

/// An accepted proof of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proof {
    /// The chain's genesis block, accepted without a constellation.
    Genesis,
    /// A verified constellation.
    Valid {
        /// First member of the constellation.
        candidate: BigUint,
        /// Pattern it satisfies.
        pattern: AcceptedPattern,
        /// Members verified (the whole pattern).
        tuple_length: u32,
    },
}

/// Validate the proof of work of a header mined at `height`.
pub fn check_proof_of_work(
    header: &BlockHeader,
    height: u64,
    params: &ConsensusParams,
) -> Result<Proof, PowError> {
    if header.pow_hash() == params.genesis_pow_hash {
        return Ok(Proof::Genesis);
    }

    let expected = params.pow_version_at(height);
    if let Some(found) = header.pow_version() {
        if found != expected {
            log::debug!("rejecting {:?} proof of work at height {}", found, height);
            return Err(PowError::VersionNotActive {
                height,
                expected,
                found,
            });
        }
    }

    let decoded = decode(header, params).map_err(|e| {
        log::debug!("rejecting proof of work at height {}: {}", height, e);
        e
    })?;

    let mut best_tuple_length = 0;
    for &gaps in params.patterns_at(height) {
        let pattern = AcceptedPattern::from_static(gaps)?;
        let result = verify(&decoded.candidate, &pattern);
        if result.accepted {
            return Ok(Proof::Valid {
                candidate: decoded.candidate,
                pattern,
                tuple_length: result.tuple_length,
            });
        }
        best_tuple_length = best_tuple_length.max(result.tuple_length);
    }

    log::debug!(
        "no pattern satisfied at height {} (best tuple length {})",
        height,
        best_tuple_length
    );
    Err(PowError::NoPatternSatisfied { best_tuple_length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::PowNonce;
    use crate::difficulty::CompactDifficulty;
    use crate::fixed::LN_150_FP48;
    use crate::hash::hash_from_display_hex;
    use crate::network::{Network, ADJUSTMENT_WINDOW, LEGACY_MIN_DIFFICULTY};
    use crate::primality::is_probable_prime;
    use crate::primes::PrimeTable;
    use crate::target::{encode_current_nonce, generate_target};

    fn regtest_genesis() -> BlockHeader {
        let mut header = BlockHeader::new(
            536_870_912,
            [0u8; 32],
            hash_from_display_hex("495297a63256ff66e6bb810adc1660eee7a98eb55dbfeae8e25b1365b8bacca6")
                .unwrap(),
            1_707_684_554,
            CompactDifficulty(288 * 256),
        );
        header.nonce = PowNonce(
            hash_from_display_hex("00000000000000000000000000000000000000000000000000000000001a0002")
                .unwrap(),
        );
        header
    }

    /// Search a regtest header for a prime candidate the slow way.
    fn mine_regtest(mut header: BlockHeader) -> BlockHeader {
        let params = Network::Regtest.params();
        let table = PrimeTable::global();
        header.nonce = PowNonce::current(3, 0, &BigUint::from(0u32)).unwrap();
        let parts = header.bits.parts(PowVersion::Current, params).unwrap();
        let (target, _) = generate_target(&header.pow_hash(), parts, PowVersion::Current).unwrap();

        // Primorial 30: candidates target + base + 30k + r with r coprime to 30.
        let base = BigUint::from(30u32) - (&target % 30u32);
        for k in 0u32..10_000 {
            for r in [1u32, 7, 11, 13, 17, 19, 23, 29] {
                let offset = &base + k * 30 + r;
                if is_probable_prime(&(&target + &offset)) {
                    header.nonce = encode_current_nonce(&target, &offset, 3, table).unwrap();
                    return header;
                }
            }
        }
        panic!("no prime found");
    }

    /// Regtest-like chain that switches to the current version at height 100.
    static LATE_FORK: ConsensusParams = ConsensusParams {
        network: Network::Regtest,
        target_spacing: 150,
        log_target_spacing: LN_150_FP48,
        adjustment_window: ADJUSTMENT_WINDOW,
        min_difficulty: 288,
        legacy_min_difficulty: LEGACY_MIN_DIFFICULTY,
        current_pow_height: 100,
        legacy_patterns: &[&[0]],
        current_patterns: &[&[0, 2]],
        no_retargeting: true,
        genesis_pow_hash: [0xff; 32],
    };

    /// Legacy header at the legacy floor, difficulty 304.
    fn legacy_header() -> BlockHeader {
        let mut header = regtest_genesis();
        header.timestamp += 600;
        header.bits = CompactDifficulty(0x0201_3000);
        header.nonce = PowNonce::legacy(&BigUint::from(1u32)).unwrap();
        header
    }

    /// Target of a legacy header, fixed by the layout bit alone.
    fn legacy_target(header: &BlockHeader, params: &ConsensusParams) -> BigUint {
        let parts = header.bits.parts(PowVersion::Legacy, params).unwrap();
        generate_target(&header.pow_hash(), parts, PowVersion::Legacy).unwrap().0
    }

    /// Smallest odd offset whose candidate is (or is not) prime.
    fn legacy_offset(target: &BigUint, prime: bool) -> BigUint {
        (1u32..100_000)
            .step_by(2)
            .map(BigUint::from)
            .find(|offset| is_probable_prime(&(target + offset)) == prime)
            .expect("offset within range")
    }

    #[test]
    fn test_legacy_header_accepted_before_fork() {
        let mut header = legacy_header();
        let target = legacy_target(&header, &LATE_FORK);
        let offset = legacy_offset(&target, true);
        header.nonce = PowNonce::legacy(&offset).unwrap();

        match check_proof_of_work(&header, 10, &LATE_FORK) {
            Ok(Proof::Valid {
                candidate,
                pattern,
                tuple_length,
            }) => {
                assert_eq!(candidate, &target + &offset);
                assert_eq!(pattern.gaps(), &[0]);
                assert_eq!(tuple_length, 1);
                assert_eq!(candidate.bits(), 304);
            }
            other => panic!("unexpected result {:?}", other),
        }

        // The same payload is no longer valid once the current version is required.
        assert_eq!(
            check_proof_of_work(&header, 100, &LATE_FORK),
            Err(PowError::VersionNotActive {
                height: 100,
                expected: PowVersion::Current,
                found: PowVersion::Legacy,
            })
        );
    }

    #[test]
    fn test_current_payload_rejected_before_fork() {
        let mut header = regtest_genesis();
        header.timestamp += 300;
        let header = mine_regtest(header);
        assert!(matches!(
            check_proof_of_work(&header, 1, Network::Regtest.params()),
            Ok(Proof::Valid { .. })
        ));
        assert_eq!(
            check_proof_of_work(&header, 10, &LATE_FORK),
            Err(PowError::VersionNotActive {
                height: 10,
                expected: PowVersion::Legacy,
                found: PowVersion::Current,
            })
        );
    }

    #[test]
    fn test_legacy_composite_rejected() {
        let mut header = legacy_header();
        let target = legacy_target(&header, &LATE_FORK);
        header.nonce = PowNonce::legacy(&legacy_offset(&target, false)).unwrap();
        assert_eq!(
            check_proof_of_work(&header, 10, &LATE_FORK),
            Err(PowError::NoPatternSatisfied {
                best_tuple_length: 0
            })
        );
    }

    #[test]
    fn test_mainnet_legacy_sextuplet_required() {
        // A prime first member is not enough before the fork: the sextuplet needs all six.
        let params = Network::Mainnet.params();
        let mut header = legacy_header();
        let target = legacy_target(&header, params);
        let offset = (1u32..100_000)
            .step_by(2)
            .map(BigUint::from)
            .find(|offset| {
                let first = &target + offset;
                is_probable_prime(&first) && !is_probable_prime(&(first + 4u32))
            })
            .unwrap();
        header.nonce = PowNonce::legacy(&offset).unwrap();
        assert_eq!(
            check_proof_of_work(&header, 1_000, params),
            Err(PowError::NoPatternSatisfied {
                best_tuple_length: 1
            })
        );
    }

    #[test]
    fn test_genesis_accepted() {
        let params = Network::Regtest.params();
        assert_eq!(check_proof_of_work(&regtest_genesis(), 0, params), Ok(Proof::Genesis));
    }

    #[test]
    fn test_mined_regtest_header_accepted() {
        let params = Network::Regtest.params();
        let mut header = regtest_genesis();
        header.prev_block_hash = header.hash();
        header.timestamp += 150;
        let header = mine_regtest(header);

        match check_proof_of_work(&header, 1, params) {
            Ok(Proof::Valid {
                candidate,
                pattern,
                tuple_length,
            }) => {
                assert_eq!(tuple_length, 1);
                assert_eq!(pattern.gaps(), &[0]);
                assert!(is_probable_prime(&candidate));
                assert_eq!(candidate.bits(), 288);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_composite_candidate_rejected() {
        let params = Network::Regtest.params();
        let mut header = regtest_genesis();
        header.timestamp += 1;
        let mined = mine_regtest(header);

        // Bumping the remainder by one keeps the header well formed but makes the candidate even.
        let mut broken = mined.clone();
        let remainder = mined.nonce.primorial_remainder() + 1u32;
        broken.nonce = PowNonce::current(
            mined.nonce.primorial_number(),
            mined.nonce.primorial_multiplier(),
            &remainder,
        )
        .unwrap();
        assert_eq!(
            check_proof_of_work(&broken, 1, params),
            Err(PowError::NoPatternSatisfied {
                best_tuple_length: 0
            })
        );
    }

    #[test]
    fn test_version_schedule_enforced() {
        let params = Network::Mainnet.params();
        let mut header = regtest_genesis();
        header.bits = CompactDifficulty(0x0201_3000);
        header.nonce = PowNonce::default();
        header.nonce.0[0] = 2;
        assert_eq!(
            check_proof_of_work(&header, 1000, params),
            Err(PowError::VersionNotActive {
                height: 1000,
                expected: PowVersion::Legacy,
                found: PowVersion::Current,
            })
        );
    }

    #[test]
    fn test_decode_errors_surface() {
        let params = Network::Regtest.params();
        let mut header = regtest_genesis();
        header.timestamp += 1;
        header.nonce = PowNonce::default();
        header.nonce.0[0] = 4;
        assert_eq!(
            check_proof_of_work(&header, 1, params),
            Err(PowError::Decode(DecodeError::UnknownPowVersion(4)))
        );
    }
}

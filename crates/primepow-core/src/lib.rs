//! Consensus core for prime-constellation proof of work.
//!
//! This crate provides pure Rust implementations of:
//! - A deterministic Baillie-PSW primality oracle and next-prime search
//! - Block header serialization and the proof-of-work payload codec
//! - Target generation from the proof-of-work hash
//! - Constellation verification against the accepted patterns
//! - The logarithmic difficulty adjuster in 2^48 fixed point
//! - Merit computation for miner statistics

pub mod block;
pub mod constellation;
pub mod difficulty;
pub mod fixed;
pub mod hash;
pub mod merit;
pub mod network;
pub mod primality;
pub mod primes;
pub mod target;
pub mod validation;

pub use block::{BlockHeader, PowNonce, PowVersion};
pub use constellation::{verify, AcceptedPattern, PatternError, VerifyResult};
pub use difficulty::{
    next_difficulty, next_work_required, AdjustmentError, BlockSummary, ChainView,
    CompactDifficulty, CompactError, FixedPointDifficulty,
};
pub use hash::double_sha256;
pub use network::{ConsensusParams, Network};
pub use primality::{is_probable_prime, next_prime};
pub use primes::PrimeTable;
pub use target::{decode, DecodeError, DecodedPow};
pub use validation::{check_proof_of_work, PowError, Proof};

//! Network definitions and consensus parameters.

use std::str::FromStr;

use thiserror::Error;

use crate::block::PowVersion;
use crate::fixed::{FRACTION_BITS, LN_150_FP48, LN_300_FP48};

/// Blocks in the difficulty adjustment window.
pub const ADJUSTMENT_WINDOW: u64 = 174;

/// Lowest legacy difficulty ever accepted.
pub const LEGACY_MIN_DIFFICULTY: u32 = 304;

/// A single block's span is clamped to this many target spacings.
pub const MAX_SPAN_FACTOR: u64 = 12;

/// Damping shift applied when difficulty rises (1/256).
pub const INCREASE_SHIFT: u32 = 8;

/// Damping shift applied when difficulty falls (1/64).
pub const DECREASE_SHIFT: u32 = 6;

/// Mainnet sextuplet, accepted before the current proof-of-work version.
const MAINNET_LEGACY_PATTERNS: &[&[u32]] = &[&[0, 4, 2, 4, 2, 4]];

/// Mainnet septuplets.
const MAINNET_CURRENT_PATTERNS: &[&[u32]] = &[&[0, 2, 4, 2, 4, 6, 2], &[0, 2, 6, 4, 2, 4, 2]];

/// Testnet quintuplets.
const TESTNET_PATTERNS: &[&[u32]] = &[&[0, 4, 2, 4, 2], &[0, 2, 4, 2, 4]];

/// Regtest accepts any single prime.
const REGTEST_PATTERNS: &[&[u32]] = &[&[0]];

/// Consensus constants for one chain. Built statically, never mutated.
#[derive(Debug)]
pub struct ConsensusParams {
    /// Which chain these parameters belong to.
    pub network: Network,
    /// Target seconds between blocks.
    pub target_spacing: u64,
    /// `floor(ln(target_spacing) · 2^48)`, fixed at compile time.
    pub log_target_spacing: u64,
    /// Number of block spans averaged by the adjuster.
    pub adjustment_window: u64,
    /// Minimum integer difficulty for current-version blocks.
    pub min_difficulty: u32,
    /// Minimum difficulty for legacy-version blocks.
    pub legacy_min_difficulty: u32,
    /// First height at which the current proof-of-work version is required.
    pub current_pow_height: u64,
    /// Patterns accepted below `current_pow_height`, as gaps between members.
    pub legacy_patterns: &'static [&'static [u32]],
    /// Patterns accepted from `current_pow_height` on.
    pub current_patterns: &'static [&'static [u32]],
    /// Keep difficulty constant (regression testing).
    pub no_retargeting: bool,
    /// Proof-of-work hash of the genesis block (internal byte order).
    pub genesis_pow_hash: [u8; 32],
}

static MAINNET_PARAMS: ConsensusParams = ConsensusParams {
    network: Network::Mainnet,
    target_spacing: 150,
    log_target_spacing: LN_150_FP48,
    adjustment_window: ADJUSTMENT_WINDOW,
    min_difficulty: 600,
    legacy_min_difficulty: LEGACY_MIN_DIFFICULTY,
    current_pow_height: 1_482_768,
    legacy_patterns: MAINNET_LEGACY_PATTERNS,
    current_patterns: MAINNET_CURRENT_PATTERNS,
    no_retargeting: false,
    genesis_pow_hash: [
        0xbb, 0xc1, 0x81, 0xed, 0xcd, 0xd3, 0x28, 0x6b,
        0xf2, 0x14, 0x35, 0x46, 0x43, 0xd1, 0x43, 0x61,
        0xb2, 0x46, 0x81, 0xb9, 0xac, 0x1e, 0x17, 0xbf,
        0x0e, 0xab, 0x0e, 0x5a, 0x6d, 0x46, 0xd0, 0x26,
    ],
};

static TESTNET_PARAMS: ConsensusParams = ConsensusParams {
    network: Network::Testnet,
    target_spacing: 300,
    log_target_spacing: LN_300_FP48,
    adjustment_window: ADJUSTMENT_WINDOW,
    min_difficulty: 512,
    legacy_min_difficulty: LEGACY_MIN_DIFFICULTY,
    current_pow_height: 0,
    legacy_patterns: TESTNET_PATTERNS,
    current_patterns: TESTNET_PATTERNS,
    no_retargeting: false,
    genesis_pow_hash: [
        0x34, 0xc7, 0xfc, 0x7c, 0x9c, 0xa5, 0x88, 0x37,
        0xca, 0xc5, 0x93, 0x4c, 0xf5, 0xa0, 0xcd, 0x6b,
        0x85, 0xa9, 0xdf, 0x45, 0x66, 0x2f, 0x66, 0xc1,
        0xc5, 0x79, 0x10, 0xf8, 0x8b, 0x55, 0x8d, 0xd3,
    ],
};

static REGTEST_PARAMS: ConsensusParams = ConsensusParams {
    network: Network::Regtest,
    target_spacing: 150,
    log_target_spacing: LN_150_FP48,
    adjustment_window: ADJUSTMENT_WINDOW,
    min_difficulty: 288,
    legacy_min_difficulty: LEGACY_MIN_DIFFICULTY,
    current_pow_height: 0,
    legacy_patterns: REGTEST_PATTERNS,
    current_patterns: REGTEST_PATTERNS,
    no_retargeting: true,
    genesis_pow_hash: [
        0x4a, 0xd9, 0x49, 0xbf, 0x3d, 0x55, 0x6a, 0x91,
        0xdd, 0x28, 0x60, 0x12, 0x65, 0x36, 0x13, 0xb4,
        0x5b, 0x5a, 0xe9, 0xcb, 0x88, 0x00, 0xc7, 0xa2,
        0xbb, 0x3c, 0x05, 0xbf, 0xcf, 0xcf, 0x50, 0xe4,
    ],
};

impl ConsensusParams {
    /// Proof-of-work version required for a block at `height`.
    pub fn pow_version_at(&self, height: u64) -> PowVersion {
        if height >= self.current_pow_height {
            PowVersion::Current
        } else {
            PowVersion::Legacy
        }
    }

    /// Pattern set accepted at `height`.
    pub fn patterns_at(&self, height: u64) -> &'static [&'static [u32]] {
        match self.pow_version_at(height) {
            PowVersion::Current => self.current_patterns,
            PowVersion::Legacy => self.legacy_patterns,
        }
    }

    /// Minimum current-version difficulty in 2^48 fixed point.
    #[inline]
    pub fn min_difficulty_fixed(&self) -> u64 {
        u64::from(self.min_difficulty) << FRACTION_BITS
    }

    /// Longest span a single block may contribute to the window.
    #[inline]
    pub fn max_span(&self) -> u64 {
        self.target_spacing * MAX_SPAN_FACTOR
    }
}

/// Error returned when parsing an unknown network name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

/// Chain selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// Production chain
    #[default]
    Mainnet,
    /// Public test chain
    Testnet,
    /// Local regression-test chain
    Regtest,
}

impl Network {
    /// Consensus parameters for this network.
    pub fn params(&self) -> &'static ConsensusParams {
        match self {
            Network::Mainnet => &MAINNET_PARAMS,
            Network::Testnet => &TESTNET_PARAMS,
            Network::Regtest => &REGTEST_PARAMS,
        }
    }

    /// Get network name as string.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

//! Block header construction, serialization and the proof-of-work payload.

use num_bigint::BigUint;

use crate::difficulty::CompactDifficulty;
use crate::hash::double_sha256;

/// Size of the header prefix hashed for proof of work (everything but the nonce).
pub const POW_HEADER_SIZE: usize = 80;

/// Size of a full serialized header.
pub const BLOCK_HEADER_SIZE: usize = 112;

/// Bits of the current payload taken by the primorial remainder.
pub const REMAINDER_BITS: u32 = 160;

/// Low 16 bits of every current-version nonce.
pub const CURRENT_POW_TAG: u16 = 2;

/// Proof-of-work encoding, selected by the low bits of the nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowVersion {
    /// Zero-padded target, whole nonce is the offset (nonce bit 0 set).
    Legacy,
    /// Primorial-compressed offset (nonce low 16 bits equal 2).
    Current,
}

/// The 256-bit proof-of-work payload, stored little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PowNonce(pub [u8; 32]);

impl PowNonce {
    /// Low 16 bits of the payload.
    #[inline]
    pub fn low_u16(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// Discriminate the proof-of-work version, `None` if neither encoding matches.
    pub fn version(&self) -> Option<PowVersion> {
        if self.0[0] & 1 == 1 {
            Some(PowVersion::Legacy)
        } else if self.low_u16() == CURRENT_POW_TAG {
            Some(PowVersion::Current)
        } else {
            None
        }
    }

    /// Whether the header uses the legacy field order (bits before time).
    ///
    /// True for legacy payloads and for an all-zero low half-word (the mainnet genesis block).
    #[inline]
    pub fn uses_legacy_layout(&self) -> bool {
        self.0[0] & 1 == 1 || self.low_u16() == 0
    }

    /// The payload read as a little-endian integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    /// Build a payload from a little-endian integer; `None` if it needs more than 256 bits.
    pub fn from_biguint(value: &BigUint) -> Option<Self> {
        if value.bits() > 256 {
            return None;
        }
        let mut bytes = [0u8; 32];
        let le = value.to_bytes_le();
        bytes[..le.len()].copy_from_slice(&le);
        Some(PowNonce(bytes))
    }

    /// Number of leading primes in the primorial (current version).
    #[inline]
    pub fn primorial_number(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    /// Primorial multiplier (current version).
    pub fn primorial_multiplier(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[4..12]);
        u64::from_le_bytes(bytes)
    }

    /// Primorial remainder, 160 bits (current version).
    pub fn primorial_remainder(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0[12..32])
    }

    /// Pack a current-version payload.
    ///
    /// Returns `None` if `remainder` does not fit in 160 bits.
    pub fn current(primorial_number: u16, multiplier: u64, remainder: &BigUint) -> Option<Self> {
        if remainder.bits() > u64::from(REMAINDER_BITS) {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes[0..2].copy_from_slice(&CURRENT_POW_TAG.to_le_bytes());
        bytes[2..4].copy_from_slice(&primorial_number.to_le_bytes());
        bytes[4..12].copy_from_slice(&multiplier.to_le_bytes());
        let le = remainder.to_bytes_le();
        bytes[12..12 + le.len()].copy_from_slice(&le);
        Some(PowNonce(bytes))
    }

    /// Pack a legacy payload holding `offset`.
    ///
    /// Returns `None` if the offset is even (bit 0 is the legacy marker) or wider than 256 bits.
    pub fn legacy(offset: &BigUint) -> Option<Self> {
        if !offset.bit(0) {
            return None;
        }
        Self::from_biguint(offset)
    }
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block (internal byte order).
    pub prev_block_hash: [u8; 32],
    /// Merkle root of all transactions.
    pub merkle_root: [u8; 32],
    /// Block timestamp (Unix time).
    pub timestamp: u64,
    /// Required difficulty in compact form.
    pub bits: CompactDifficulty,
    /// Proof-of-work payload.
    pub nonce: PowNonce,
}

impl BlockHeader {
    /// Create a new block header with an empty payload.
    pub fn new(
        version: i32,
        prev_block_hash: [u8; 32],
        merkle_root: [u8; 32],
        timestamp: u64,
        bits: CompactDifficulty,
    ) -> Self {
        BlockHeader {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce: PowNonce::default(),
        }
    }

    /// Serialize everything except the nonce (80 bytes).
    ///
    /// Legacy-layout headers place the bits before the time.
    pub fn serialize_without_nonce(&self) -> [u8; POW_HEADER_SIZE] {
        let mut header = [0u8; POW_HEADER_SIZE];

        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_block_hash);
        header[36..68].copy_from_slice(&self.merkle_root);

        if self.nonce.uses_legacy_layout() {
            header[68..72].copy_from_slice(&self.bits.0.to_le_bytes());
            header[72..80].copy_from_slice(&self.timestamp.to_le_bytes());
        } else {
            header[68..76].copy_from_slice(&self.timestamp.to_le_bytes());
            header[76..80].copy_from_slice(&self.bits.0.to_le_bytes());
        }

        header
    }

    /// Serialize the full header (112 bytes).
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        header[..POW_HEADER_SIZE].copy_from_slice(&self.serialize_without_nonce());
        header[POW_HEADER_SIZE..].copy_from_slice(&self.nonce.0);
        header
    }

    /// Block hash (double SHA256 of the full header).
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }

    /// Proof-of-work hash (double SHA256 of the header without the nonce).
    ///
    /// Seeds the target. Only the layout choice depends on the nonce.
    pub fn pow_hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize_without_nonce())
    }

    /// Proof-of-work version encoded in the nonce, if any.
    #[inline]
    pub fn pow_version(&self) -> Option<PowVersion> {
        self.nonce.version()
    }
}

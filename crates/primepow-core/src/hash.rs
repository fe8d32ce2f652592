//! SHA256d hashing and hash display helpers.

use sha2::{Digest, Sha256};

/// Double SHA256: SHA256(SHA256(data)).
///
/// Used for the block hash and the proof-of-work hash.
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    double_sha256_parts(&[data])
}

/// Double SHA256 over the concatenation of `parts`, without copying them together.
pub fn double_sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let inner = parts
        .iter()
        .fold(Sha256::new(), |hasher, part| hasher.chain_update(part))
        .finalize();
    Sha256::digest(inner).into()
}

/// Hex of a hash in display order (most significant byte first).
///
/// Hashes are stored little-endian, so the bytes are printed back to front.
pub fn hash_to_display_hex(hash: &[u8; 32]) -> String {
    let mut display = *hash;
    display.reverse();
    hex::encode(display)
}

/// Parse a display-order hex hash into internal byte order.
pub fn hash_from_display_hex(display: &str) -> Result<[u8; 32], hex::FromHexError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(display, &mut bytes)?;
    bytes.reverse();
    Ok(bytes)
}

//! Accelerator pre-filter interface.
//!
//! An accelerator runs a base-2 Fermat test over a batch of candidates. Its
//! answers are hints: a rejected candidate is skipped, an accepted one still goes
//! through the full constellation check on the CPU. Backends are interchangeable
//! behind [`AcceleratorBackend`]; the pipeline only ever holds a trait object.
//!
//! Candidates cross the interface as little-endian `u32` limbs, `bit_width / 32`
//! limbs per candidate, with `bit_width` a multiple of 32.

mod software;
mod thread;

use std::time::Duration;

use num_bigint::BigUint;
use thiserror::Error;

pub use software::SoftwareFermat;
pub use thread::AcceleratorThread;

/// Accelerator failures. All of them are recovered by testing on the CPU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceleratorError {
    #[error("no accelerator device available")]
    NoDevice,

    #[error("device {device} out of range ({count} devices)")]
    InvalidDevice { device: u32, count: u32 },

    #[error("accelerator init failed: {0}")]
    Init(String),

    #[error("accelerator batch failed: {0}")]
    Batch(String),

    #[error("batch of {count} candidates at {bit_width} bits needs {expected} limbs, got {found}")]
    BadLimbs {
        count: usize,
        bit_width: u32,
        expected: usize,
        found: usize,
    },

    #[error("expected {expected} results, got {found}")]
    BadResults { expected: usize, found: usize },

    #[error("accelerator missed its {0:?} deadline")]
    Timeout(Duration),

    #[error("accelerator thread is gone")]
    Disconnected,
}

/// A device able to Fermat-test candidates in bulk.
pub trait AcceleratorBackend: Send {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Number of usable devices.
    fn device_count(&self) -> u32;

    /// Human-readable name of a device.
    fn device_name(&self, device: u32) -> Option<String>;

    /// Prepare `device` for batches.
    fn init(&mut self, device: u32) -> Result<(), AcceleratorError>;

    /// Test `count` candidates packed as `bit_width`-bit little-endian limbs.
    ///
    /// Returns one flag per candidate, `true` when `2^(n-1) = 1 (mod n)`.
    fn batch_test(
        &mut self,
        limbs: &[u32],
        count: usize,
        bit_width: u32,
    ) -> Result<Vec<bool>, AcceleratorError>;

    /// Release device resources. Called once, after the last batch.
    fn cleanup(&mut self);
}

/// Limb width able to hold `bits` bits, rounded up to a multiple of 32.
#[inline]
pub fn limb_width(bits: u64) -> u32 {
    (bits.max(1).div_ceil(32) * 32) as u32
}

/// Pack candidates into `bit_width / 32` little-endian limbs each.
///
/// Returns `None` if a candidate does not fit `bit_width` bits.
pub fn pack_limbs(candidates: &[BigUint], bit_width: u32) -> Option<Vec<u32>> {
    let per_candidate = (bit_width / 32) as usize;
    let mut limbs = Vec::with_capacity(per_candidate * candidates.len());
    for candidate in candidates {
        let digits = candidate.to_u32_digits();
        if digits.len() > per_candidate {
            return None;
        }
        limbs.extend_from_slice(&digits);
        limbs.resize(limbs.len() + per_candidate - digits.len(), 0);
    }
    Some(limbs)
}

/// Split packed limbs back into candidates.
pub fn unpack_limbs(limbs: &[u32], bit_width: u32) -> Vec<BigUint> {
    let per_candidate = (bit_width / 32).max(1) as usize;
    limbs
        .chunks(per_candidate)
        .map(BigUint::from_slice)
        .collect()
}

/// Check that `limbs` holds exactly `count` candidates of `bit_width` bits.
pub fn check_batch(limbs: &[u32], count: usize, bit_width: u32) -> Result<(), AcceleratorError> {
    let expected = count * (bit_width / 32) as usize;
    if bit_width == 0 || bit_width % 32 != 0 || limbs.len() != expected {
        return Err(AcceleratorError::BadLimbs {
            count,
            bit_width,
            expected,
            found: limbs.len(),
        });
    }
    Ok(())
}

/// Probe `backends` in order and return the first one that initializes `device`.
pub fn select_backend(
    backends: Vec<Box<dyn AcceleratorBackend>>,
    device: u32,
) -> Option<Box<dyn AcceleratorBackend>> {
    for mut backend in backends {
        let count = backend.device_count();
        if device >= count {
            log::warn!(
                target: "miner",
                "{}: device {} not available ({} devices)",
                backend.name(),
                device,
                count
            );
            continue;
        }
        match backend.init(device) {
            Ok(()) => {
                log::info!(
                    target: "miner",
                    "using accelerator {} on {}",
                    backend.name(),
                    backend
                        .device_name(device)
                        .unwrap_or_else(|| format!("device {}", device))
                );
                return Some(backend);
            }
            Err(e) => {
                log::warn!(target: "miner", "{}: init failed: {}", backend.name(), e);
            }
        }
    }
    log::warn!(target: "miner", "no accelerator available, testing on the CPU only");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    struct Broken;

    impl AcceleratorBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn device_count(&self) -> u32 {
            1
        }
        fn device_name(&self, _device: u32) -> Option<String> {
            None
        }
        fn init(&mut self, _device: u32) -> Result<(), AcceleratorError> {
            Err(AcceleratorError::Init("driver missing".into()))
        }
        fn batch_test(&mut self, _: &[u32], _: usize, _: u32) -> Result<Vec<bool>, AcceleratorError> {
            unreachable!()
        }
        fn cleanup(&mut self) {}
    }

    #[test]
    fn test_limb_width() {
        assert_eq!(limb_width(0), 32);
        assert_eq!(limb_width(1), 32);
        assert_eq!(limb_width(32), 32);
        assert_eq!(limb_width(33), 64);
        assert_eq!(limb_width(288), 288);
        assert_eq!(limb_width(289), 320);
    }

    #[test]
    fn test_pack_limbs_layout() {
        let candidates = [BigUint::from(0x1_0000_0002u64), BigUint::from(7u32)];
        let limbs = pack_limbs(&candidates, 96).unwrap();
        assert_eq!(limbs, vec![2, 1, 0, 7, 0, 0]);
        assert_eq!(unpack_limbs(&limbs, 96), candidates.to_vec());
        assert!(check_batch(&limbs, 2, 96).is_ok());
    }

    #[test]
    fn test_pack_limbs_rejects_oversized() {
        let big = BigUint::one() << 64u32;
        assert_eq!(pack_limbs(&[big], 64), None);
    }

    #[test]
    fn test_check_batch_rejects_mismatch() {
        assert_eq!(
            check_batch(&[1, 2, 3], 2, 64),
            Err(AcceleratorError::BadLimbs {
                count: 2,
                bit_width: 64,
                expected: 4,
                found: 3
            })
        );
        assert!(check_batch(&[1, 2], 1, 48).is_err());
    }

    #[test]
    fn test_select_backend_skips_failures() {
        let backends: Vec<Box<dyn AcceleratorBackend>> =
            vec![Box::new(Broken), Box::new(SoftwareFermat::new())];
        let selected = select_backend(backends, 0).unwrap();
        assert_eq!(selected.name(), "software-fermat");

        let backends: Vec<Box<dyn AcceleratorBackend>> = vec![Box::new(Broken)];
        assert!(select_backend(backends, 0).is_none());

        let backends: Vec<Box<dyn AcceleratorBackend>> = vec![Box::new(SoftwareFermat::new())];
        assert!(select_backend(backends, 3).is_none());
    }
}

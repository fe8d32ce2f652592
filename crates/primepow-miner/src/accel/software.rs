//! CPU implementation of the accelerator interface.

use num_bigint::BigUint;
use primepow_core::primality::fermat_base2;

use super::{check_batch, AcceleratorBackend, AcceleratorError};

/// Runs the batch Fermat test on the calling thread.
///
/// Useful as a reference for device backends and where no device is present.
#[derive(Debug, Default)]
pub struct SoftwareFermat {
    ready: bool,
    batches: u64,
}

impl SoftwareFermat {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AcceleratorBackend for SoftwareFermat {
    fn name(&self) -> &str {
        "software-fermat"
    }

    fn device_count(&self) -> u32 {
        1
    }

    fn device_name(&self, device: u32) -> Option<String> {
        (device == 0).then(|| "host cpu".to_string())
    }

    fn init(&mut self, device: u32) -> Result<(), AcceleratorError> {
        if device != 0 {
            return Err(AcceleratorError::InvalidDevice { device, count: 1 });
        }
        self.ready = true;
        Ok(())
    }

    fn batch_test(
        &mut self,
        limbs: &[u32],
        count: usize,
        bit_width: u32,
    ) -> Result<Vec<bool>, AcceleratorError> {
        if !self.ready {
            return Err(AcceleratorError::Batch("backend not initialized".into()));
        }
        check_batch(limbs, count, bit_width)?;
        self.batches += 1;

        let per_candidate = (bit_width / 32) as usize;
        Ok(limbs
            .chunks(per_candidate)
            .map(|chunk| fermat_base2(&BigUint::from_slice(chunk)))
            .collect())
    }

    fn cleanup(&mut self) {
        log::debug!(target: "miner", "software-fermat: {} batches served", self.batches);
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{limb_width, pack_limbs};
    use num_traits::One;

    #[test]
    fn test_requires_init() {
        let mut backend = SoftwareFermat::new();
        assert!(backend.batch_test(&[7], 1, 32).is_err());
        assert_eq!(
            backend.init(1),
            Err(AcceleratorError::InvalidDevice { device: 1, count: 1 })
        );
        assert!(backend.init(0).is_ok());
        assert_eq!(backend.device_name(0).as_deref(), Some("host cpu"));
    }

    #[test]
    fn test_batch_matches_fermat() {
        let mut backend = SoftwareFermat::new();
        backend.init(0).unwrap();

        let p = (BigUint::one() << 303u32) + 101u32;
        let candidates = vec![
            BigUint::from(7u32),
            BigUint::from(9u32),
            // Base-2 Fermat pseudoprime: the pre-filter lets it through.
            BigUint::from(341u32),
            p.clone(),
            p + 2u32,
        ];
        let width = limb_width(candidates.iter().map(|c| c.bits()).max().unwrap());
        let limbs = pack_limbs(&candidates, width).unwrap();

        let results = backend.batch_test(&limbs, candidates.len(), width).unwrap();
        assert_eq!(results, vec![true, false, true, true, false]);

        backend.cleanup();
        assert!(backend.batch_test(&limbs, candidates.len(), width).is_err());
    }
}

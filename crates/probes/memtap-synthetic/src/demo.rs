//! A ready-made image resembling the address space of a recorder process.

use crate::signal::signal;
use crate::{Rng, SyntheticError, SyntheticProcess};
use memtap_core::{AddressRange, Protection, RegionState, SignatureConfig};

/// Base address of the write buffer in [`demo_process`].
pub const DEMO_BUFFER: usize = 0x0052_0000;

/// Builds a process image with code, reserved and heap-like regions and one
/// write buffer at [`DEMO_BUFFER`] whose eighth super-block carries the signature.
///
/// The same seed always yields the same image.
pub fn demo_process(seed: u64) -> Result<SyntheticProcess, SyntheticError> {
    let config = SignatureConfig::default();
    let mut rng = Rng::from_seed(seed);
    let process = SyntheticProcess::new(AddressRange::new(0x0001_0000, 0x7ffe_0000));

    process.map(0x0040_0000, 0x2_0000, RegionState::Committed, Protection::Other)?;
    process.map(0x0042_0000, 0x1_0000, RegionState::Reserved, Protection::Other)?;
    for i in 0..4 {
        let noise = rng.noise(0x4000);
        process.map_samples(0x0043_0000 + i * 0x8000, &noise)?;
    }
    process.map(0x0050_0000, 0x1_0000, RegionState::Committed, Protection::Other)?;
    process.map_samples(DEMO_BUFFER, &signal(&config, 10, &[7], 30, &mut rng))?;
    let tail = rng.noise(0x8000);
    process.map_samples(0x0060_0000, &tail)?;
    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtap_core::PatternDetector;
    use memtap_core::enumerator::RegionEnumerator;
    use memtap_core::sample::read_samples;

    #[test]
    fn test_only_buffer_matches() -> anyhow::Result<()> {
        let process = demo_process(9)?;
        let detector = PatternDetector::new(SignatureConfig::default());
        let range = memtap_core::ForeignProcess::address_space(&process)?;
        let mut matches = vec![];
        for region in RegionEnumerator::new(&process, range, usize::MAX) {
            if !region.is_readwrite_committed() {
                continue;
            }
            let block = read_samples(&process, &region)?;
            if let Some(offset) = detector.detect(block.samples()) {
                matches.push((region.base, offset));
            }
        }
        assert_eq!(matches, vec![(DEMO_BUFFER, 7 * 512)]);
        Ok(())
    }
}

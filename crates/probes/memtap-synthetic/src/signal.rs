//! Sample patterns matching or missing the buffer signature.

use crate::Rng;
use memtap_core::SignatureConfig;

/// One super-block whose sub-blocks each end in exactly `zeros` zero samples.
///
/// Everything else is nonzero noise, so the block scores `s0 = zeros` with no
/// deviation. `zeros` is clamped to the sub-block length.
pub fn signature_super_block(config: &SignatureConfig, zeros: usize, rng: &mut Rng) -> Vec<i16> {
    let zeros = zeros.min(config.sub_block_len);
    let mut block = rng.noise(config.super_block_len);
    for row in block[..config.window_len()].chunks_exact_mut(config.sub_block_len) {
        let len = row.len();
        row[len - zeros..].fill(0);
    }
    block
}

/// `super_blocks` super-blocks of noise where the blocks listed in `matching`
/// carry the signature with `zeros` trailing zeros.
pub fn signal(
    config: &SignatureConfig,
    super_blocks: usize,
    matching: &[usize],
    zeros: usize,
    rng: &mut Rng,
) -> Vec<i16> {
    (0..super_blocks)
        .flat_map(|i| {
            if matching.contains(&i) {
                signature_super_block(config, zeros, rng)
            } else {
                rng.noise(config.super_block_len)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtap_core::PatternDetector;

    #[test]
    fn test_signature_block_scores_exactly() {
        let config = SignatureConfig::default();
        let mut rng = Rng::from_seed(1);
        let block = signature_super_block(&config, 30, &mut rng);
        let score = PatternDetector::new(config)
            .score(&block, 0)
            .expect("block holds a full window");
        assert_eq!((score.s0, score.b1, score.b2), (30, 0, 0));
    }

    #[test]
    fn test_signal_is_found_at_matching_block() {
        let config = SignatureConfig::default();
        let mut rng = Rng::from_seed(2);
        let samples = signal(&config, 10, &[7], 30, &mut rng);
        assert_eq!(samples.len(), 5120);
        assert_eq!(PatternDetector::new(config).detect(&samples), Some(7 * 512));
    }

    #[test]
    fn test_out_of_window_zeros_do_not_match() {
        let config = SignatureConfig::default();
        let mut rng = Rng::from_seed(3);
        let samples = signal(&config, 4, &[0, 1, 2, 3], 50, &mut rng);
        assert_eq!(PatternDetector::new(config).detect(&samples), None);
    }
}

//! Signature detection for the cyclic write buffer.
//!
//! The buffer being searched for stores 16-bit samples in fixed-size rows whose
//! tails are zero padded. Scanned as 512-sample super-blocks, a genuine buffer
//! shows five consecutive 65-sample rows that all end in (roughly) the same
//! number of zeros, and contain (roughly) no other zeros. Arbitrary memory almost
//! never looks like this.
//!
//! The constants describe one buffer layout and live in [`SignatureConfig`] so that
//! a different layout only needs a different configuration.

use serde::{Deserialize, Serialize};

/// Geometry and acceptance thresholds of the buffer signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Stride between candidate offsets, in samples
    pub super_block_len: usize,
    /// Length of one row, in samples
    pub sub_block_len: usize,
    /// Number of consecutive rows examined per candidate
    pub sub_blocks: usize,
    /// The first row's trailing zero count must be greater than this
    pub trailing_lower: usize,
    /// The first row's trailing zero count must be less than this
    pub trailing_upper: usize,
    /// Largest accepted deviation from the first row's trailing zero count
    pub max_deviation: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            super_block_len: 512,
            sub_block_len: 65,
            sub_blocks: 5,
            trailing_lower: 20,
            trailing_upper: 50,
            max_deviation: 2,
        }
    }
}

impl SignatureConfig {
    /// Number of samples examined per candidate offset.
    pub const fn window_len(&self) -> usize {
        self.sub_blocks * self.sub_block_len
    }
}

/// Zero statistics of one super-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SuperBlockScore {
    /// Trailing zeros of the first row
    pub s0: usize,
    /// Largest deviation of any row's trailing zeros from `s0`
    pub b1: usize,
    /// Largest deviation of any row's total zeros from `s0`
    pub b2: usize,
}

/// Binary classifier for the write buffer signature.
///
/// [`detect`](PatternDetector::detect) is pure: the same samples always give the
/// same answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector {
    config: SignatureConfig,
}

impl PatternDetector {
    /// Creates a detector for the given signature.
    pub fn new(config: SignatureConfig) -> Self {
        PatternDetector { config }
    }

    /// The signature this detector matches.
    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Candidate offsets examined for a block of `len` samples.
    ///
    /// A candidate is only examined if its window ends strictly before the end of
    /// the block.
    pub fn candidates(&self, len: usize) -> impl Iterator<Item = usize> + use<> {
        let window = self.config.window_len();
        (0..len)
            .step_by(self.config.super_block_len.max(1))
            .take_while(move |offset| offset + window < len)
    }

    /// Computes the zero statistics of the super-block starting at `offset`.
    ///
    /// Returns `None` if the super-block's window does not fit into `samples`.
    pub fn score(&self, samples: &[i16], offset: usize) -> Option<SuperBlockScore> {
        let row_len = self.config.sub_block_len;
        if row_len == 0 {
            return None;
        }
        let window = samples.get(offset..offset + self.config.window_len())?;

        let trailing = |row: &[i16]| row.iter().rev().take_while(|&&s| s == 0).count();
        let total = |row: &[i16]| row.iter().filter(|&&s| s == 0).count();

        let mut rows = window.chunks_exact(row_len);
        let first = rows.next()?;
        // both deviations are taken against the first row's trailing zeros
        let s0 = trailing(first);
        let mut b1 = 0;
        let mut b2 = total(first).abs_diff(s0);
        for row in rows {
            b1 = b1.max(trailing(row).abs_diff(s0));
            b2 = b2.max(total(row).abs_diff(s0));
        }
        Some(SuperBlockScore { s0, b1, b2 })
    }

    /// Whether a score satisfies the signature.
    pub fn accepts(&self, score: &SuperBlockScore) -> bool {
        score.s0 > self.config.trailing_lower
            && score.s0 < self.config.trailing_upper
            && score.b1 <= self.config.max_deviation
            && score.b2 <= self.config.max_deviation
    }

    /// Searches `samples` for the signature.
    ///
    /// # Returns
    ///
    /// The sample offset of the first matching super-block, scanning from low to
    /// high offsets, or `None` if no super-block matches.
    pub fn detect(&self, samples: &[i16]) -> Option<usize> {
        self.candidates(samples.len()).find(|&offset| {
            self.score(samples, offset)
                .is_some_and(|score| self.accepts(&score))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPER: usize = 512;
    const ROW: usize = 65;

    /// One row: `ROW - zeros` non-zero samples followed by `zeros` zeros.
    fn row(zeros: usize) -> Vec<i16> {
        let mut r: Vec<i16> = (0..ROW - zeros).map(|i| (i as i16 % 100) + 1).collect();
        r.extend(std::iter::repeat_n(0, zeros));
        r
    }

    /// A super-block whose five rows end in the given numbers of zeros.
    fn super_block(zeros: [usize; 5]) -> Vec<i16> {
        let mut sb: Vec<i16> = zeros.iter().flat_map(|&z| row(z)).collect();
        sb.resize(SUPER, 7);
        sb
    }

    fn noise_block() -> Vec<i16> {
        (0..SUPER).map(|i| (i as i16 * 31 + 17) | 1).collect()
    }

    #[test]
    fn test_default_constants() {
        let config = SignatureConfig::default();
        assert_eq!(config.super_block_len, 512);
        assert_eq!(config.sub_block_len, 65);
        assert_eq!(config.sub_blocks, 5);
        assert_eq!(config.window_len(), 325);
    }

    #[test]
    fn test_uniform_rows_match_at_first_offset() {
        let detector = PatternDetector::default();
        for zeros in 21..50 {
            let mut samples = super_block([zeros; 5]);
            samples.extend(super_block([zeros; 5]));
            samples.extend(super_block([zeros; 5]));
            assert_eq!(detector.detect(&samples), Some(0), "zeros = {}", zeros);
        }
    }

    #[test]
    fn test_trailing_window_is_exclusive() {
        let detector = PatternDetector::default();
        for zeros in [0, 10, 20, 50, 60, 65] {
            let mut samples = super_block([zeros; 5]);
            samples.extend(noise_block());
            assert_eq!(detector.detect(&samples), None, "zeros = {}", zeros);
        }
    }

    #[test]
    fn test_deviation_limit() {
        let detector = PatternDetector::default();
        let mut samples = super_block([30, 32, 28, 31, 30]);
        samples.extend(noise_block());
        assert_eq!(detector.detect(&samples), Some(0));

        let mut samples = super_block([30, 33, 30, 30, 30]);
        samples.extend(noise_block());
        assert_eq!(detector.detect(&samples), None);
    }

    #[test]
    fn test_total_zeros_compared_to_first_trailing_count() {
        let detector = PatternDetector::default();
        // row 0 has 30 trailing zeros plus 3 interior zeros: trailing counts agree
        // but its total (33) deviates from s0 by 3
        let mut samples = super_block([30; 5]);
        samples[0] = 0;
        samples[1] = 0;
        samples[2] = 0;
        samples.extend(noise_block());
        let score = detector.score(&samples, 0).unwrap();
        assert_eq!(score, SuperBlockScore { s0: 30, b1: 0, b2: 3 });
        assert_eq!(detector.detect(&samples), None);

        // two interior zeros stay within the limit
        samples[2] = 5;
        assert_eq!(detector.detect(&samples), Some(0));
    }

    #[test]
    fn test_first_match_wins() {
        let detector = PatternDetector::default();
        let mut samples = noise_block();
        samples.extend(noise_block());
        samples.extend(super_block([40; 5]));
        samples.extend(super_block([25; 5]));
        samples.extend(noise_block());
        assert_eq!(detector.detect(&samples), Some(2 * SUPER));
    }

    #[test]
    fn test_only_stride_offsets_are_examined() {
        let detector = PatternDetector::default();
        // a perfect window starting off-stride is never seen
        let mut samples = vec![1i16; 100];
        samples.extend(super_block([30; 5]));
        samples.extend(noise_block());
        assert_eq!(detector.detect(&samples), None);
    }

    #[test]
    fn test_window_must_end_before_block_end() {
        let detector = PatternDetector::default();
        let samples: Vec<i16> = super_block([30; 5])[..ROW * 5].to_vec();
        assert_eq!(detector.detect(&samples), None);

        let samples: Vec<i16> = super_block([30; 5])[..ROW * 5 + 1].to_vec();
        assert_eq!(detector.detect(&samples), Some(0));
    }

    #[test]
    fn test_empty_and_short_blocks() {
        let detector = PatternDetector::default();
        assert_eq!(detector.detect(&[]), None);
        assert_eq!(detector.detect(&[0; 100]), None);
        assert_eq!(detector.candidates(0).count(), 0);
    }

    #[test]
    fn test_all_zero_memory_is_rejected() {
        let detector = PatternDetector::default();
        let samples = vec![0i16; 4 * SUPER];
        let score = detector.score(&samples, 0).unwrap();
        assert_eq!(score.s0, 65);
        assert_eq!(detector.detect(&samples), None);
    }

    #[test]
    fn test_detect_is_deterministic() {
        let detector = PatternDetector::default();
        let mut samples = noise_block();
        samples.extend(super_block([22, 23, 21, 22, 24]));
        samples.extend(noise_block());
        let first = detector.detect(&samples);
        for _ in 0..10 {
            assert_eq!(detector.detect(&samples), first);
        }
        assert_eq!(first, Some(SUPER));
    }

    #[test]
    fn test_custom_layout() {
        let detector = PatternDetector::new(SignatureConfig {
            super_block_len: 64,
            sub_block_len: 10,
            sub_blocks: 3,
            trailing_lower: 2,
            trailing_upper: 6,
            max_deviation: 0,
        });
        let mut samples: Vec<i16> = Vec::new();
        for _ in 0..3 {
            samples.extend([1, 2, 3, 4, 5, 6, 0, 0, 0, 0]);
        }
        samples.resize(128, 9);
        assert_eq!(detector.detect(&samples), Some(0));
    }
}

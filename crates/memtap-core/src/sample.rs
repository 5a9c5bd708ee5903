//! Samples read out of the foreign process.

use crate::process::{ForeignProcess, MemoryRegion};
use serde::Serialize;

/// Size of one sample in bytes.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<i16>();

/// 16-bit samples read from one region at one instant.
///
/// Holds only the samples that were actually read; a short read yields a shorter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBlock(Vec<i16>);

impl SampleBlock {
    /// Decodes native-endian samples from raw bytes. A trailing odd byte is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        SampleBlock(
            bytes
                .chunks_exact(SAMPLE_SIZE)
                .map(|b| i16::from_ne_bytes([b[0], b[1]]))
                .collect(),
        )
    }

    /// The samples.
    pub fn samples(&self) -> &[i16] {
        &self.0
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Widens every sample to `f64`. The conversion is exact.
    pub fn to_wide(&self) -> Vec<f64> {
        self.0.iter().map(|&s| f64::from(s)).collect()
    }
}

impl From<Vec<i16>> for SampleBlock {
    fn from(value: Vec<i16>) -> Self {
        SampleBlock(value)
    }
}

/// Reads the full contents of `region` as a [`SampleBlock`].
///
/// Only the number of bytes reported by the read is trusted.
///
/// # Errors
///
/// Propagates the read error of the foreign process.
pub fn read_samples<P: ForeignProcess + ?Sized>(
    process: &P,
    region: &MemoryRegion,
) -> Result<SampleBlock, P::Error> {
    let mut buf = vec![0u8; region.size];
    let n = process.read_into(region.base, &mut buf)?;
    buf.truncate(n.min(region.size));
    Ok(SampleBlock::from_bytes(&buf))
}

/// One snapshot of the buffer, ready to hand to a sink.
///
/// The `position` vector is `[start, reserved, length]`, with `start` and
/// `reserved` always zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleFrame {
    /// Widened samples
    pub data: Vec<f64>,
    /// Position and length marker `[start, reserved, length]`
    pub position: [f64; 3],
    /// Frame sequence number, starting at 0
    pub sequence: u64,
}

impl SampleFrame {
    /// Builds a frame from a sample block.
    pub fn new(block: &SampleBlock, sequence: u64) -> Self {
        SampleFrame {
            data: block.to_wide(),
            position: [0.0, 0.0, block.len() as f64],
            sequence,
        }
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

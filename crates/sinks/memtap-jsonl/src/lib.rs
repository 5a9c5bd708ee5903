//! JSON lines sink for memtap.
//!
//! Implements [`memtap_core::FrameSink`] by writing one JSON object per frame:
//!
//! ```text
//! {"sequence":0,"DATA":[12.0,-3.0,...],"POS":[0.0,0.0,1024.0]}
//! ```
//!
//! `DATA` holds the widened samples and `POS` the `[start, reserved, length]`
//! marker of the frame.

#![warn(missing_docs)]

use memtap_core::{FrameSink, SampleFrame};
use serde::Serialize;
use std::io::{self, Write};
use thiserror::Error;

/// Errors of the JSON lines sink.
#[derive(Debug, Error)]
pub enum JsonlError {
    /// Writing to the underlying writer failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The frame could not be encoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Line<'a> {
    sequence: u64,
    #[serde(rename = "DATA")]
    data: &'a [f64],
    #[serde(rename = "POS")]
    position: &'a [f64; 3],
}

/// Writes every frame as one JSON line and flushes after each.
pub struct JsonlSink<W: Write> {
    writer: W,
    frames: u64,
}

impl<W: Write> JsonlSink<W> {
    /// Creates a sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        JsonlSink { writer, frames: 0 }
    }

    /// Number of frames written.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for JsonlSink<W> {
    type Error = JsonlError;

    fn put_frame(&mut self, frame: SampleFrame) -> Result<(), Self::Error> {
        let line = Line {
            sequence: frame.sequence,
            data: &frame.data,
            position: &frame.position,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.frames += 1;
        Ok(())
    }
}

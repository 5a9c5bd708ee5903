//! Numeric sinks receiving sample frames.
//!
//! The [`FrameSink`] trait is the boundary to whatever analyses the samples. The
//! acquisition loop hands over one [`SampleFrame`] per tick and treats any error as
//! a lost frame.

use crate::sample::SampleFrame;

/// Trait for consumers of sample frames.
///
/// # Associated Types
///
/// * `Error` - The error type returned when a frame is rejected. Must implement
///   [`std::error::Error`].
///
/// # Examples
///
/// See `memtap-jsonl` for a sink writing frames as JSON lines. Closures can be used
/// through [`FnSink`].
pub trait FrameSink {
    /// The error type returned when a frame is rejected.
    type Error: std::error::Error;

    /// Consumes one frame. Called synchronously from the acquisition loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be delivered. The frame is dropped
    /// and acquisition continues.
    fn put_frame(&mut self, frame: SampleFrame) -> Result<(), Self::Error>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    type Error = S::Error;

    fn put_frame(&mut self, frame: SampleFrame) -> Result<(), Self::Error> {
        (**self).put_frame(frame)
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    type Error = S::Error;

    fn put_frame(&mut self, frame: SampleFrame) -> Result<(), Self::Error> {
        (**self).put_frame(frame)
    }
}

/// Adapter turning a closure into a [`FrameSink`].
pub struct FnSink<F>(pub F);

impl<F, E> FrameSink for FnSink<F>
where
    F: FnMut(SampleFrame) -> Result<(), E>,
    E: std::error::Error,
{
    type Error = E;

    fn put_frame(&mut self, frame: SampleFrame) -> Result<(), Self::Error> {
        (self.0)(frame)
    }
}

/// Error type that can never occur.
#[derive(Debug, thiserror::Error)]
pub enum Never {}

/// Sink that drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    type Error = Never;

    fn put_frame(&mut self, _frame: SampleFrame) -> Result<(), Self::Error> {
        Ok(())
    }
}

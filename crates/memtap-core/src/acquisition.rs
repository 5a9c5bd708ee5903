//! Steady-state polling of the located buffer.

use crate::config::MemtapConfig;
use crate::locator::BufferLocation;
use crate::process::ForeignProcess;
use crate::sample::{SampleFrame, read_samples};
use crate::sink::FrameSink;
use crate::util::{Clock, Deadline, deadline_bar, stamp};
use indicatif::{MultiProgress, ProgressBar};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Why acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionOutcome {
    /// The session time budget was used up.
    SessionTimeout,
    /// The caller cleared the running flag.
    Cancelled,
}

/// Counters of an acquisition run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcquisitionReport {
    /// Why the loop ended
    pub outcome: AcquisitionOutcome,
    /// Ticks executed
    pub ticks: u64,
    /// Frames accepted by the sink
    pub frames_sent: u64,
    /// Ticks lost to a failed region query or read
    pub failed_reads: u64,
    /// Frames rejected by the sink
    pub sink_failures: u64,
    /// Samples in all accepted frames
    pub samples_sent: u64,
    /// Time spent polling, in milliseconds
    pub elapsed_ms: u64,
}

impl AcquisitionReport {
    fn new() -> Self {
        AcquisitionReport {
            outcome: AcquisitionOutcome::SessionTimeout,
            ticks: 0,
            frames_sent: 0,
            failed_reads: 0,
            sink_failures: 0,
            samples_sent: 0,
            elapsed_ms: 0,
        }
    }
}

/// Re-reads the located buffer at a fixed cadence and forwards every snapshot.
///
/// Each tick re-queries the region at the buffer's page, because its size may
/// change between ticks, reads it in full, widens the samples and hands the frame
/// to the sink. A failed read or a rejected frame costs that tick only; there is no
/// retry. The loop runs until the session deadline passes or the running flag is
/// cleared, both polled at the start of every tick.
pub struct AcquisitionLoop<'a, P, S, C>
where
    P: ForeignProcess + ?Sized,
    S: FrameSink + ?Sized,
    C: Clock + ?Sized,
{
    process: &'a P,
    sink: &'a mut S,
    clock: &'a C,
    location: BufferLocation,
    session_timeout: Duration,
    tick_interval: Duration,
    sequence: u64,
    progress: Option<ProgressBar>,
}

impl<'a, P, S, C> AcquisitionLoop<'a, P, S, C>
where
    P: ForeignProcess + ?Sized,
    S: FrameSink + ?Sized,
    C: Clock + ?Sized,
{
    /// Creates a new acquisition loop.
    ///
    /// # Arguments
    ///
    /// * `process` - The foreign process holding the buffer
    /// * `sink` - Receiver of the sample frames
    /// * `clock` - Time source for the session deadline and tick pauses
    /// * `location` - The buffer found by discovery
    /// * `config` - Session timeout and tick interval
    pub fn new(
        process: &'a P,
        sink: &'a mut S,
        clock: &'a C,
        location: BufferLocation,
        config: &MemtapConfig,
    ) -> Self {
        AcquisitionLoop {
            process,
            sink,
            clock,
            location,
            session_timeout: config.session_timeout,
            tick_interval: config.tick_interval,
            sequence: 0,
            progress: None,
        }
    }

    /// Shows a progress bar over the session deadline.
    pub fn with_progress(mut self, progress: &MultiProgress) -> Self {
        let p = deadline_bar(progress, "Session timeout", self.session_timeout);
        p.enable_steady_tick(Duration::from_secs(1));
        self.progress = Some(p);
        self
    }

    /// Polls the buffer until the session deadline passes or `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) -> AcquisitionReport {
        let deadline = Deadline::start(self.clock, self.session_timeout);
        let mut report = AcquisitionReport::new();
        info!(
            "Polling buffer at page {:#x} every {:?} for up to {:?}",
            self.location.page, self.tick_interval, self.session_timeout
        );
        loop {
            if !running.load(Ordering::Relaxed) {
                info!("Acquisition cancelled. Stopping.");
                report.outcome = AcquisitionOutcome::Cancelled;
                break;
            }
            if deadline.expired(self.clock) {
                info!("Session timeout reached. Stopping.");
                report.outcome = AcquisitionOutcome::SessionTimeout;
                break;
            }
            if let Some(p) = &self.progress {
                p.set_position(deadline.elapsed(self.clock).as_secs());
            }
            report.ticks += 1;
            self.tick(&deadline, &mut report);
            self.clock.sleep(self.tick_interval);
        }
        report.elapsed_ms = deadline.elapsed(self.clock).as_millis() as u64;
        if let Some(p) = &self.progress {
            p.finish_and_clear();
        }
        info!(
            "{}: sent {} frame(s) in {} tick(s)",
            stamp(deadline.elapsed(self.clock)),
            report.frames_sent,
            report.ticks
        );
        report
    }

    fn tick(&mut self, deadline: &Deadline, report: &mut AcquisitionReport) {
        let region = match self.process.query_region(self.location.page) {
            Ok(region) => region,
            Err(e) => {
                warn!("Querying buffer page {:#x} failed: {}", self.location.page, e);
                report.failed_reads += 1;
                return;
            }
        };
        let block = match read_samples(self.process, &region) {
            Ok(block) => block,
            Err(e) => {
                warn!("Reading buffer {:?} failed: {}", region, e);
                report.failed_reads += 1;
                return;
            }
        };
        let samples = block.len();
        let frame = SampleFrame::new(&block, self.sequence);
        self.sequence += 1;
        match self.sink.put_frame(frame) {
            Ok(()) => {
                report.frames_sent += 1;
                report.samples_sent += samples as u64;
                debug!(
                    "{}: sent {} samples",
                    stamp(deadline.elapsed(self.clock)),
                    samples
                );
            }
            Err(e) => {
                warn!("Sink rejected frame {}: {}", self.sequence - 1, e);
                report.sink_failures += 1;
            }
        }
    }
}

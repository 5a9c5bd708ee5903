use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source threaded through discovery and acquisition.
///
/// All deadline checks and pauses go through a `Clock`, so the control loops
/// can be driven by a [`ManualClock`] in tests.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock standing at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// A time budget started at a fixed point of a [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Duration,
    budget: Duration,
}

impl Deadline {
    /// Starts a budget of `budget` at the clock's current time.
    pub fn start<C: Clock + ?Sized>(clock: &C, budget: Duration) -> Self {
        Deadline {
            start: clock.now(),
            budget,
        }
    }

    /// Time spent since the budget was started.
    pub fn elapsed<C: Clock + ?Sized>(&self, clock: &C) -> Duration {
        clock.now().saturating_sub(self.start)
    }

    /// Time left, zero once expired.
    pub fn remaining<C: Clock + ?Sized>(&self, clock: &C) -> Duration {
        self.budget.saturating_sub(self.elapsed(clock))
    }

    /// Whether the whole budget has been spent.
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        self.elapsed(clock) >= self.budget
    }

    /// The total budget.
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Formats an elapsed time as `HH:MM:SS.cc` for log milestones.
pub fn stamp(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed.subsec_millis() / 10
    )
}

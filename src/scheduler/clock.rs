//! Wall-clock sources for the scheduler.
//!
//! Schedules are expressed in local wall time. Timers themselves sleep on
//! tokio's timer, so a clock only has to answer "what time is it now".

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Source of the current local wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall time anchored at a fixed start and advanced by tokio's clock.
///
/// Under `#[tokio::test(start_paused = true)]` whole days can be simulated:
/// tokio auto-advances past pending sleeps and this clock follows.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    start: NaiveDateTime,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { start, anchor: tokio::time::Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed =
            TimeDelta::from_std(self.anchor.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.start + elapsed
    }
}

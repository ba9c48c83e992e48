//! Single-shot debounce timer for starting background caching.
//!
//! A viewer re-arms it on every bit of activity (time change, edit, pause).
//! It fires once the configured delay passes with no re-arm, which is when
//! the viewer starts a background cache task. Polled from the owner's loop;
//! there is no timer thread.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheWaitTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Default for CacheWaitTimer {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl CacheWaitTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)start the countdown.
    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    pub fn schedule_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
        log::trace!("CacheWaitTimer: armed for {}ms", self.delay.as_millis());
    }

    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            log::trace!("CacheWaitTimer: cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once per arming, when the delay has elapsed.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                log::trace!("CacheWaitTimer: fired");
                true
            }
            _ => false,
        }
    }
}

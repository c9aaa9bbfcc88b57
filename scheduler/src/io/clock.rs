use std::{cell::Cell, rc::Rc, time::Instant};

/// Source of the current time in milliseconds.
///
/// The epoch is arbitrary; the scheduler only compares readings taken from
/// the same clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`Instant`], with its epoch at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Clock whose time only moves when told to.
///
/// Clones share the same time. With a non-zero `step`, every reading
/// advances the time by `step` milliseconds afterwards, so spinning code
/// observes time passing without sleeping.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    step: u64,
}

impl ManualClock {
    /// A clock frozen at zero.
    pub fn new() -> Self {
        ManualClock::default()
    }

    /// A clock starting at zero that advances `step` ms per reading.
    pub fn stepping(step: u64) -> Self {
        ManualClock {
            now: Rc::default(),
            step,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    /// Current time, without stepping.
    pub fn peek(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now.saturating_add(self.step));
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(25);
        assert_eq!(other.now_ms(), 25);
        other.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn stepping_clock_advances_per_reading() {
        let clock = ManualClock::stepping(3);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 3);
        assert_eq!(clock.peek(), 6);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_ms() >= first + 1);
    }
}

//! Record timestamps.
//!
//! `SystemClock` stamps records with Unix milliseconds; `LogicalClock` hands
//! out a monotone counter so traces are byte-for-byte reproducible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> u64;

    /// Restart numbering. Wall clocks ignore this.
    fn reset(&self) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        now_unix_millis()
    }
}

#[derive(Debug, Default)]
pub struct LogicalClock {
    tick: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn reset(&self) {
        self.tick.store(0, Ordering::Relaxed);
    }
}

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_clock_is_monotone() {
        let clock = LogicalClock::new();
        assert_eq!(clock.now(), 1);
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn test_logical_clock_reset_restarts() {
        let clock = LogicalClock::new();
        clock.now();
        clock.now();
        clock.reset();
        assert_eq!(clock.now(), 1);
    }
}

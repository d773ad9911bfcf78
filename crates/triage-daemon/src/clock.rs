//! Clock abstraction for idle accounting.
//!
//! Sessions read `now()` through this trait so idle sweeps can be tested
//! with a clock that only moves when a test advances it.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn elapsed(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Production clock backed by `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Instant);

    impl Clock for FixedClock {
        fn now(&self) -> Instant {
            self.0
        }
    }

    #[test]
    fn test_elapsed_measures_from_start() {
        let start = Instant::now();
        let clock = FixedClock(start + Duration::from_secs(301));
        assert_eq!(clock.elapsed(start), Duration::from_secs(301));
    }

    #[test]
    fn test_elapsed_saturates_for_future_instants() {
        let clock = FixedClock(Instant::now());
        let later = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.elapsed(later), Duration::ZERO);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let start = clock.now();
        assert!(clock.now() >= start);
    }
}

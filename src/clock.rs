//! Injectable time source for TTLs, debounce deadlines, and timestamps.

use std::cell::Cell;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Monotonic and wall-clock time, shared by the resolver, cache, and service.
pub trait Clock {
    /// Monotonic instant used for deadlines and ages.
    fn instant(&self) -> Instant;
    /// Wall-clock time used for persisted timestamps.
    fn now(&self) -> DateTime<Utc>;
}

/// Time that only moves when a test advances it.
#[derive(Debug)]
pub struct ManualClock {
    /// Instant the clock was created at.
    base_instant: Instant,
    /// Wall time the clock was created at.
    base_wall: DateTime<Utc>,
    /// Total time advanced so far.
    offset: Cell<Duration>,
}

impl ManualClock {
    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get().saturating_add(by));
    }

    /// Clock frozen at the current moment.
    pub fn new() -> Self {
        return Self {
            base_instant: Instant::now(),
            base_wall: Utc::now(),
            offset: Cell::new(Duration::ZERO),
        };
    }
}

impl Default for ManualClock {
    /// Same as [`ManualClock::new`].
    fn default() -> Self {
        return Self::new();
    }
}

impl Clock for ManualClock {
    /// Creation instant plus everything advanced.
    fn instant(&self) -> Instant {
        let offset = self.offset.get();
        return self.base_instant.checked_add(offset).unwrap_or(self.base_instant);
    }

    /// Creation wall time plus everything advanced.
    fn now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.offset.get()).unwrap_or_default();
        return self.base_wall.checked_add_signed(offset).unwrap_or(self.base_wall);
    }
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    /// `Instant::now()`.
    fn instant(&self) -> Instant {
        return Instant::now();
    }

    /// `Utc::now()`.
    fn now(&self) -> DateTime<Utc> {
        return Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Clock as _, ManualClock};

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let start = clock.instant();
        let wall = clock.now();
        assert_eq!(clock.instant(), start);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.instant().duration_since(start), Duration::from_millis(1500));
        assert_eq!((clock.now() - wall).num_milliseconds(), 1500);
    }
}

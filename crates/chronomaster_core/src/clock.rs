//! Instant sources for bitemporal writes.
//!
//! # Invariants
//! - Every clock returns strictly increasing instants within one process,
//!   so two mutations never share a version or correction instant.
//! - Instants carry microsecond precision, matching storage.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Point on either time axis.
pub type Instant = DateTime<Utc>;

/// Source of "now" for a logical operation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock that never goes backwards and never repeats an instant.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_micros: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let wall = Utc::now().timestamp_micros();
        let mut previous = self.last_micros.load(Ordering::Acquire);
        loop {
            let next = wall.max(previous + 1);
            match self.last_micros.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return from_micros(next),
                Err(actual) => previous = actual,
            }
        }
    }
}

/// Deterministic clock advancing by a fixed step on every call.
///
/// The first call returns `start`.
#[derive(Debug)]
pub struct SteppingClock {
    next_micros: AtomicI64,
    step_micros: i64,
}

impl SteppingClock {
    pub fn new(start: Instant, step: Duration) -> Self {
        let step_micros = step.num_microseconds().unwrap_or(1).max(1);
        Self {
            next_micros: AtomicI64::new(start.timestamp_micros()),
            step_micros,
        }
    }

    /// Starts at `2020-01-01T00:00:00Z` with a one-second step.
    pub fn starting_2020() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
            Duration::seconds(1),
        )
    }

    /// Returns the instant the next `now()` call will produce.
    pub fn peek(&self) -> Instant {
        from_micros(self.next_micros.load(Ordering::Acquire))
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        from_micros(
            self.next_micros
                .fetch_add(self.step_micros, Ordering::AcqRel),
        )
    }
}

/// Converts an instant to its storage form.
pub fn to_micros(instant: Instant) -> i64 {
    instant.timestamp_micros()
}

/// Converts a storage value back to an instant, saturating out-of-range values.
pub fn from_micros(micros: i64) -> Instant {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::{from_micros, to_micros, Clock, SteppingClock, SystemClock};
    use chrono::Duration;

    #[test]
    fn system_clock_is_strictly_increasing() {
        let clock = SystemClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn stepping_clock_advances_by_step() {
        let clock = SteppingClock::starting_2020();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second - first, Duration::seconds(1));
        assert_eq!(clock.peek() - second, Duration::seconds(1));
    }

    #[test]
    fn micros_conversion_preserves_precision() {
        let clock = SteppingClock::starting_2020();
        let instant = clock.now() + Duration::microseconds(7);
        assert_eq!(from_micros(to_micros(instant)), instant);
    }
}

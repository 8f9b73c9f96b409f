use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::Mutex;

/// Single authoritative time source for request creation.
///
/// Returns strictly increasing timestamps at microsecond resolution (the
/// precision Postgres keeps), so two requests never share a `created_at`
/// even when the wall clock stalls or steps backwards.
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let wall = wall
            .duration_trunc(Duration::microseconds(1))
            .unwrap_or(wall);

        let mut last = self.last.lock();
        let next = if wall > *last {
            wall
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Advance past a timestamp observed elsewhere (e.g. the newest persisted request)
    pub fn observe(&self, seen: DateTime<Utc>) {
        let mut last = self.last.lock();
        if seen > *last {
            *last = seen;
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_observe_future_timestamp() {
        let clock = MonotonicClock::new();
        let future = Utc::now() + Duration::hours(1);
        clock.observe(future);
        assert_eq!(clock.now(), future + Duration::microseconds(1));
    }
}

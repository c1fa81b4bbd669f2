use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Clock supplies the evaluation instant when the context does not pin one.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use spectral::prelude::*;

    #[test]
    fn fixed_clock_moves_on_request() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_that!(clock.now()).is_equal_to(start);

        clock.advance(Duration::hours(2));
        assert_that!(clock.now()).is_equal_to(start + Duration::hours(2));

        clock.set(start);
        assert_that!(clock.now()).is_equal_to(start);
    }

    #[test]
    fn system_clock_is_current() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert_that!(now >= before).is_true();
    }
}

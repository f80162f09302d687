// src/utils/time.rs

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;

/// Smallest step between two server stamps. Matches Postgres TIMESTAMPTZ precision.
pub fn tick() -> Duration {
    Duration::microseconds(1)
}

/// Current UTC time truncated to microseconds, so it round-trips through the database.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// The later of `candidate` and one tick after `previous`.
pub fn next_after(previous: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if candidate <= prev => prev + tick(),
        _ => candidate,
    }
}

/// Wall clock that never repeats or goes backwards, even if the system clock does.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let stamp = next_after(*last, now_micros());
        *last = Some(stamp);
        stamp
    }
}

//! Monotonic clock types for stamping captured frames.
//!
//! A [`Timestamps`] is taken once when a capture session starts and acts as the
//! reference point; every frame carries a [`Timestamp`] measured against it.
//! Persisted metadata stores the offset as nanoseconds since session start.

use std::time::{Duration, Instant, SystemTime};

#[derive(Clone, Copy, Debug)]
pub enum Timestamp {
    Instant(Instant),
    SystemTime(SystemTime),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::Instant(Instant::now())
    }

    pub fn duration_since(&self, start: Timestamps) -> Duration {
        self.checked_duration_since(start).unwrap_or(Duration::ZERO)
    }

    pub fn checked_duration_since(&self, start: Timestamps) -> Option<Duration> {
        match self {
            Self::Instant(instant) => instant.checked_duration_since(start.instant),
            Self::SystemTime(time) => time.duration_since(start.system_time).ok(),
        }
    }

    /// Nanoseconds since `start`, saturating at zero for timestamps that
    /// somehow predate the reference point.
    pub fn nanos_since(&self, start: Timestamps) -> u64 {
        self.duration_since(start).as_nanos() as u64
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        match self {
            Self::Instant(instant) => Self::Instant(instant + rhs),
            Self::SystemTime(time) => Self::SystemTime(time + rhs),
        }
    }
}

/// Paired monotonic + wall-clock reference point for one session.
#[derive(Clone, Copy, Debug)]
pub struct Timestamps {
    instant: Instant,
    system_time: SystemTime,
}

impl Timestamps {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            system_time: SystemTime::now(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn system_time(&self) -> SystemTime {
        self.system_time
    }

    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_since_is_monotonic() {
        let start = Timestamps::now();
        let a = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let b = Timestamp::now();

        assert!(a.nanos_since(start) <= b.nanos_since(start));
        assert!(b.nanos_since(start) >= 2_000_000);
    }

    #[test]
    fn timestamp_before_reference_saturates_to_zero() {
        let early = Timestamp::now();
        std::thread::sleep(Duration::from_millis(1));
        let start = Timestamps::now();

        assert_eq!(early.nanos_since(start), 0);
    }

    #[test]
    fn add_duration_advances_instant() {
        let start = Timestamps::now();
        let ts = Timestamp::Instant(start.instant()) + Duration::from_millis(5);
        assert_eq!(ts.duration_since(start), Duration::from_millis(5));
    }
}

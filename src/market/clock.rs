//! Session clock
//!
//! Every market decision is taken on the exchange's wall clock, never the
//! host's local time. [`WallClock`] is re-projected from an absolute instant
//! on each query and is never cached.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// Source of the current absolute instant
pub trait SessionClock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Clock backed by the host's system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SessionClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl SessionClock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Exchange-local projection of an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub instant: DateTime<Utc>,
}

impl WallClock {
    /// Project `instant` onto the wall clock of `tz`
    pub fn project(instant: DateTime<Utc>, tz: Tz) -> Self {
        let local = instant.with_timezone(&tz);
        Self {
            date: local.date_naive(),
            weekday: local.weekday(),
            hour: local.hour(),
            minute: local.minute(),
            instant,
        }
    }

    /// Minutes elapsed since local midnight
    pub fn minutes_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

/// Absolute instant of `date` at `time` on the wall clock of `tz`.
///
/// Returns `None` when the local time does not exist in that zone.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Minutes since midnight of a time of day, ignoring seconds
pub(crate) fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    /// Instant of an IST wall-clock time
    pub fn ist(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Clock that follows tokio's (pausable) time from a fixed origin
    pub struct TokioClock {
        origin: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl TokioClock {
        pub fn new(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl SessionClock for TokioClock {
        fn now_utc(&self) -> DateTime<Utc> {
            let elapsed = tokio::time::Instant::now() - self.started;
            self.origin + chrono::Duration::from_std(elapsed).unwrap()
        }
    }
}

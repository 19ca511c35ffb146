//! Drift-free rearming
//!
//! A slot's next firing is always computed from the current wall-clock
//! instant and the slot's absolute time of day, never by adding a fixed
//! period to the previous firing. Timer lateness, long callbacks and host
//! suspension therefore cannot accumulate; occurrences missed while the host
//! was asleep are skipped rather than queued.

use crate::market::{local_instant, WallClock};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;

/// When and after how long a slot should fire next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmPlan {
    pub fires_at: DateTime<Utc>,
    pub delay: Duration,
}

/// First instant strictly after `now` at which the wall clock of `tz` reads `at`
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let mut date = WallClock::project(now, tz).date;
    // Today, tomorrow, and one spare day for a local time skipped by a zone transition
    for _ in 0..3 {
        if let Some(target) = local_instant(tz, date, at) {
            if target > now {
                return Some(target);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Plan the next firing of `at` relative to `now`
pub fn plan(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> Option<ArmPlan> {
    plan_after(now, now, at, tz)
}

/// Plan the next firing of `at` strictly after both `now` and `after`.
/// The delay is still measured from `now`.
pub fn plan_after(
    now: DateTime<Utc>,
    after: DateTime<Utc>,
    at: NaiveTime,
    tz: Tz,
) -> Option<ArmPlan> {
    let fires_at = next_occurrence(now.max(after), at, tz)?;
    let delay = (fires_at - now).to_std().ok()?;
    Some(ArmPlan { fires_at, delay })
}

/// Human-readable `Xh Ym` form of a delay, for logs
pub fn describe(delay: Duration) -> String {
    let secs = delay.as_secs();
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

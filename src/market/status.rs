//! Market status resolver
//!
//! Derives open/closed state purely from the exchange wall clock and the
//! configured session hours. Nothing here is stored; every call re-projects
//! the instant it is given.

use crate::config::{MarketHours, SessionConfig};
use crate::market::clock::{local_instant, minutes_of, WallClock};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Upper bound on days scanned when looking for the next session
const MAX_LOOKAHEAD_DAYS: usize = 14;

/// Phase of the trading day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketPhase {
    Open,
    ClosedWeekend,
    ClosedHoliday,
    ClosedPreMarket,
    ClosedPostMarket,
}

impl MarketPhase {
    pub fn label(&self) -> &'static str {
        match self {
            MarketPhase::Open => "open",
            MarketPhase::ClosedWeekend => "closed-weekend",
            MarketPhase::ClosedHoliday => "closed-holiday",
            MarketPhase::ClosedPreMarket => "closed-pre-market",
            MarketPhase::ClosedPostMarket => "closed-post-market",
        }
    }
}

/// Snapshot of the market state at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketStatus {
    pub is_open: bool,
    /// Next session open; `None` while open or when it cannot be computed
    pub next_open: Option<DateTime<Utc>>,
    pub phase: MarketPhase,
    pub message: String,
}

impl MarketStatus {
    fn closed(phase: MarketPhase, next_open: Option<DateTime<Utc>>) -> Self {
        Self {
            is_open: false,
            next_open,
            phase,
            message: phase.label().to_string(),
        }
    }

    fn open() -> Self {
        Self {
            is_open: true,
            next_open: None,
            phase: MarketPhase::Open,
            message: MarketPhase::Open.label().to_string(),
        }
    }
}

/// Trading calendar for a single exchange
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    timezone: Tz,
    hours: MarketHours,
}

impl MarketCalendar {
    pub fn new(timezone: Tz, hours: MarketHours) -> Self {
        Self { timezone, hours }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.timezone, config.market.clone())
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether `date` (exchange-local) is a scheduled trading day
    pub fn is_trading_date(&self, date: NaiveDate) -> bool {
        self.hours.trading_days.contains(&date.weekday()) && !self.hours.holidays.contains(&date)
    }

    /// Whether the exchange-local date of `now` is a trading day
    pub fn is_trading_day_at(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_date(WallClock::project(now, self.timezone).date)
    }

    /// Resolve the market status at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> MarketStatus {
        let wall = WallClock::project(now, self.timezone);

        if !self.hours.trading_days.contains(&wall.weekday) {
            return MarketStatus::closed(MarketPhase::ClosedWeekend, self.next_trading_open(now));
        }
        if self.hours.holidays.contains(&wall.date) {
            return MarketStatus::closed(MarketPhase::ClosedHoliday, self.next_trading_open(now));
        }

        let current = wall.minutes_of_day();
        if current < minutes_of(self.hours.open) {
            let today_open = local_instant(self.timezone, wall.date, self.hours.open);
            return MarketStatus::closed(MarketPhase::ClosedPreMarket, today_open);
        }
        // The closing minute itself already counts as closed
        if current >= minutes_of(self.hours.close) {
            return MarketStatus::closed(MarketPhase::ClosedPostMarket, self.next_trading_open(now));
        }

        MarketStatus::open()
    }

    /// Open of the first trading day strictly after the local date of `now`
    pub fn next_trading_open(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = WallClock::project(now, self.timezone).date;
        for _ in 0..MAX_LOOKAHEAD_DAYS {
            date = date.succ_opt()?;
            if self.is_trading_date(date) {
                return local_instant(self.timezone, date, self.hours.open);
            }
        }

        tracing::warn!(
            "No trading day within {} days of {}",
            MAX_LOOKAHEAD_DAYS,
            now
        );
        None
    }

    /// Next session open at or after `now`. While the market is open this
    /// is the following session's open.
    pub fn next_market_open(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let status = self.status_at(now);
        if status.is_open {
            self.next_trading_open(now)
        } else {
            status.next_open
        }
    }
}

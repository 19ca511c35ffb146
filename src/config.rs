//! Scheduler configuration
//!
//! Settings are read once at startup and never change afterwards.
//! [`SchedulerSettings`] is the serde-facing shape (JSON file or defaults);
//! [`SchedulerSettings::resolve`] validates it into a typed [`SessionConfig`].

use crate::error::{AppError, Result};
use crate::scheduler::ScheduleSlot;
use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable pointing at a JSON settings file
pub const CONFIG_PATH_ENV: &str = "SCHEDULER_CONFIG";

/// Environment variable overriding `refresh_url`
pub const REFRESH_URL_ENV: &str = "SCHEDULER_REFRESH_URL";

/// Refresh slot as written in the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSlotSettings {
    /// Registry key; defaults to `at` when omitted
    #[serde(default)]
    pub name: Option<String>,
    /// Time of day, `HH:MM`
    pub at: String,
    /// Context label passed to the refresh dispatcher
    pub context: String,
}

impl RefreshSlotSettings {
    fn new(at: &str, context: &str) -> Self {
        Self {
            name: None,
            at: at.to_string(),
            context: context.to_string(),
        }
    }
}

/// Raw scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub timezone: String,
    pub market_open: String,
    pub market_close: String,
    pub trading_days: Vec<String>,
    /// Exchange holidays, `YYYY-MM-DD`
    pub holidays: Vec<String>,
    pub refresh_slots: Vec<RefreshSlotSettings>,
    pub allow_overlapping_refresh: bool,
    pub event_capacity: usize,
    pub refresh_url: Option<String>,
    pub refresh_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            market_open: "09:15".to_string(),
            market_close: "15:30".to_string(),
            trading_days: ["Mon", "Tue", "Wed", "Thu", "Fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            holidays: Vec::new(),
            refresh_slots: vec![
                RefreshSlotSettings::new("09:00", "pre-market"),
                RefreshSlotSettings::new("09:30", "post-open"),
                RefreshSlotSettings::new("12:00", "mid-day"),
                RefreshSlotSettings::new("15:35", "post-close"),
            ],
            allow_overlapping_refresh: false,
            event_capacity: 64,
            refresh_url: None,
            refresh_timeout_secs: 30,
        }
    }
}

impl SchedulerSettings {
    /// Parse settings from a JSON document. Missing keys take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        tracing::info!("Loaded scheduler settings from {:?}", path.as_ref());
        Self::from_json_str(&raw)
    }

    /// Load settings from `SCHEDULER_CONFIG` if set, else defaults.
    /// `SCHEDULER_REFRESH_URL` overrides the refresh endpoint either way.
    pub fn from_env() -> Result<Self> {
        let mut settings = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(url) = std::env::var(REFRESH_URL_ENV) {
            settings.refresh_url = Some(url);
        }

        Ok(settings)
    }

    /// Validate and convert into a typed [`SessionConfig`]
    pub fn resolve(&self) -> Result<SessionConfig> {
        let timezone = self
            .timezone
            .parse::<Tz>()
            .map_err(|e| AppError::Timezone(format!("Unknown timezone '{}': {}", self.timezone, e)))?;

        let open = parse_hhmm(&self.market_open)?;
        let close = parse_hhmm(&self.market_close)?;
        if close <= open {
            return Err(AppError::Config(format!(
                "Market close {} must be after open {}",
                self.market_close, self.market_open
            )));
        }

        let mut trading_days = Vec::new();
        for day in &self.trading_days {
            let weekday = day
                .parse::<Weekday>()
                .map_err(|_| AppError::Config(format!("Invalid trading day: {}", day)))?;
            if !trading_days.contains(&weekday) {
                trading_days.push(weekday);
            }
        }
        if trading_days.is_empty() {
            return Err(AppError::Config("At least one trading day is required".into()));
        }

        let holidays = self
            .holidays
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| AppError::Config(format!("Invalid holiday '{}': {}", d, e)))
            })
            .collect::<Result<BTreeSet<_>>>()?;

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(self.refresh_slots.len());
        for slot in &self.refresh_slots {
            let at = parse_hhmm(&slot.at)?;
            let name = slot.name.clone().unwrap_or_else(|| slot.at.clone());
            if !seen.insert(name.clone()) {
                return Err(AppError::Config(format!("Duplicate refresh slot: {}", name)));
            }
            slots.push(ScheduleSlot::new(name, at, slot.context.clone()));
        }

        let refresh = match &self.refresh_url {
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| AppError::Config(format!("Invalid refresh URL '{}': {}", raw, e)))?;
                Some(RefreshEndpoint {
                    url,
                    timeout: Duration::from_secs(self.refresh_timeout_secs.max(1)),
                })
            }
            None => None,
        };

        Ok(SessionConfig {
            timezone,
            market: MarketHours {
                open,
                close,
                trading_days,
                holidays,
            },
            slots,
            allow_overlapping_refresh: self.allow_overlapping_refresh,
            event_capacity: self.event_capacity.max(1),
            refresh,
        })
    }
}

/// Parse an `HH:MM` time of day
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| AppError::Config(format!("Invalid time '{}' (expected HH:MM): {}", raw, e)))
}

/// Regular session hours and trading calendar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub trading_days: Vec<Weekday>,
    pub holidays: BTreeSet<NaiveDate>,
}

/// HTTP endpoint used by the snapshot refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEndpoint {
    pub url: Url,
    pub timeout: Duration,
}

/// Validated scheduler configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timezone: Tz,
    pub market: MarketHours,
    pub slots: Vec<ScheduleSlot>,
    pub allow_overlapping_refresh: bool,
    pub event_capacity: usize,
    pub refresh: Option<RefreshEndpoint>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SchedulerSettings::default()
            .resolve()
            .expect("built-in scheduler settings are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_resolve() {
        let config = SessionConfig::default();
        assert_eq!(config.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(config.market.open, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(config.market.close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(config.market.trading_days.len(), 5);
        assert!(!config.market.trading_days.contains(&Weekday::Sat));

        let names: Vec<_> = config.slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["09:00", "09:30", "12:00", "15:35"]);
        assert_eq!(config.slots[3].context, "post-close");
        assert!(!config.allow_overlapping_refresh);
        assert!(config.refresh.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = SchedulerSettings::from_json_str(
            r#"{ "holidays": ["2026-10-20"], "allow_overlapping_refresh": true }"#,
        )
        .unwrap();
        let config = settings.resolve().unwrap();

        assert!(config.allow_overlapping_refresh);
        assert!(config
            .market
            .holidays
            .contains(&NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()));
        assert_eq!(config.slots.len(), 4);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut settings = SchedulerSettings::default();
        settings.timezone = "Mars/Olympus".into();
        assert!(matches!(settings.resolve(), Err(AppError::Timezone(_))));

        let mut settings = SchedulerSettings::default();
        settings.market_close = "09:00".into();
        assert!(matches!(settings.resolve(), Err(AppError::Config(_))));

        let mut settings = SchedulerSettings::default();
        settings.refresh_slots.push(RefreshSlotSettings::new("12:00", "again"));
        assert!(matches!(settings.resolve(), Err(AppError::Config(_))));

        let mut settings = SchedulerSettings::default();
        settings.trading_days.clear();
        assert!(matches!(settings.resolve(), Err(AppError::Config(_))));

        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("9:5x").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "refresh_slots": [{{ "name": "open-bell", "at": "09:15", "context": "open" }}],
                "refresh_url": "http://127.0.0.1:9000/snapshot",
                "refresh_timeout_secs": 5
            }}"#
        )
        .unwrap();

        let config = SchedulerSettings::from_file(file.path())
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(config.slots.len(), 1);
        assert_eq!(config.slots[0].name, "open-bell");
        let endpoint = config.refresh.unwrap();
        assert_eq!(endpoint.url.path(), "/snapshot");
        assert_eq!(endpoint.timeout, Duration::from_secs(5));
    }
}

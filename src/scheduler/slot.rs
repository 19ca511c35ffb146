//! Recurring time-of-day refresh slots

use chrono::NaiveTime;

/// A named daily trigger: fire at `at` (exchange time) and refresh under `context`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub name: String,
    pub at: NaiveTime,
    pub context: String,
}

impl ScheduleSlot {
    pub fn new(name: impl Into<String>, at: NaiveTime, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            at,
            context: context.into(),
        }
    }

    /// Slot named `HH:MM` firing at `hour:minute:00`
    pub fn at_hm(hour: u32, minute: u32, context: impl Into<String>) -> Option<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self::new(at.format("%H:%M").to_string(), at, context))
    }
}

//! Market session module
//!
//! - Session clock: exchange wall-clock projection of the current instant
//! - Status resolver: open / closed phase and next session open

pub mod clock;
mod status;

pub use clock::{local_instant, ManualClock, SessionClock, SystemClock, WallClock};
pub use status::{MarketCalendar, MarketPhase, MarketStatus};

//! Scheduler module for market-data refresh
//!
//! Handles the session refresh schedule:
//! - Named daily slots (pre-market, post-open, mid-day, post-close IST)
//! - Drift-free rearming from the exchange wall clock
//! - Pause/resume on host visibility changes

mod controller;
pub mod dispatcher;
mod events;
pub mod rearm;
pub mod registry;
mod slot;
mod visibility;

pub use controller::{LifecycleState, SessionController};
pub use dispatcher::{DispatchOutcome, RefreshDispatcher, RefreshRecord};
pub use events::SchedulerEvent;
pub use registry::ArmedSlotInfo;
pub use slot::ScheduleSlot;
pub use visibility::{visibility_channel, Visibility};

//! Scheduler diagnostics events

use crate::scheduler::dispatcher::DispatchOutcome;
use crate::scheduler::LifecycleState;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Broadcast to every subscriber of a [`SessionController`](crate::scheduler::SessionController)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Lifecycle {
        state: LifecycleState,
    },
    SlotArmed {
        name: String,
        fires_at: DateTime<Utc>,
        delay_secs: u64,
    },
    SlotFired {
        name: String,
        context: String,
    },
    Refresh {
        context: String,
        dispatch_id: String,
        outcome: DispatchOutcome,
    },
}

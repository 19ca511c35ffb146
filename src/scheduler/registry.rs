//! Slot registry
//!
//! Owns the live timer of every armed slot. A name maps to at most one
//! timer: inserting under an existing name aborts the previous timer first.
//! Each timer carries a generation number so that a timer which already woke
//! up when it was cancelled or replaced can tell it is stale.

use crate::scheduler::rearm::ArmPlan;
use crate::scheduler::ScheduleSlot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A slot with a live timer
#[derive(Debug)]
pub struct ArmedSlot {
    pub slot: ScheduleSlot,
    pub plan: ArmPlan,
    generation: u64,
    timer: AbortHandle,
}

impl ArmedSlot {
    pub fn new(slot: ScheduleSlot, plan: ArmPlan, generation: u64, timer: AbortHandle) -> Self {
        Self {
            slot,
            plan,
            generation,
            timer,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cancel(&self) {
        self.timer.abort();
    }
}

/// Read-only view of an armed slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmedSlotInfo {
    pub name: String,
    pub context: String,
    pub fires_at: DateTime<Utc>,
    #[serde(skip)]
    pub delay: Duration,
}

/// Named slot timers
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: HashMap<String, ArmedSlot>,
    next_generation: u64,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a generation number for a timer about to be armed
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Install `armed`, aborting any timer already registered under its name
    pub fn insert(&mut self, armed: ArmedSlot) {
        if let Some(previous) = self.slots.insert(armed.slot.name.clone(), armed) {
            tracing::debug!("Replacing armed slot {}", previous.slot.name);
            previous.cancel();
        }
    }

    /// Remove the entry for `name` if it still belongs to `generation`.
    ///
    /// Used by a firing timer to claim its own entry; the timer is not
    /// aborted since the caller is that timer.
    pub fn take_current(&mut self, name: &str, generation: u64) -> Option<ArmedSlot> {
        match self.slots.get(name) {
            Some(armed) if armed.generation == generation => self.slots.remove(name),
            _ => None,
        }
    }

    /// Cancel and remove one slot
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.slots.remove(name) {
            Some(armed) => {
                armed.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every slot, returning how many were armed
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        for (_, armed) in self.slots.drain() {
            armed.cancel();
        }
        count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Armed slots ordered by next firing
    pub fn snapshot(&self) -> Vec<ArmedSlotInfo> {
        let mut slots: Vec<_> = self
            .slots
            .values()
            .map(|armed| ArmedSlotInfo {
                name: armed.slot.name.clone(),
                context: armed.slot.context.clone(),
                fires_at: armed.plan.fires_at,
                delay: armed.plan.delay,
            })
            .collect();
        slots.sort_by(|a, b| a.fires_at.cmp(&b.fires_at).then_with(|| a.name.cmp(&b.name)));
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::clock::testing::ist;
    use tokio::task::JoinHandle;

    fn pending_timer() -> JoinHandle<()> {
        tokio::spawn(std::future::pending::<()>())
    }

    fn armed(registry: &mut SlotRegistry, name: &str, timer: &JoinHandle<()>) -> ArmedSlot {
        let slot = ScheduleSlot::new(name, chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(), "test");
        let plan = ArmPlan {
            fires_at: ist(2026, 10, 19, 9, 0),
            delay: Duration::from_secs(600),
        };
        ArmedSlot::new(slot, plan, registry.next_generation(), timer.abort_handle())
    }

    #[tokio::test]
    async fn test_insert_replaces_and_aborts_previous() {
        let mut registry = SlotRegistry::new();
        let first = pending_timer();
        let second = pending_timer();

        let entry = armed(&mut registry, "09:00", &first);
        registry.insert(entry);
        let entry = armed(&mut registry, "09:00", &second);
        let second_generation = entry.generation();
        registry.insert(entry);

        assert_eq!(registry.len(), 1);
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(!second.is_finished());

        // The stale generation cannot claim the entry
        assert!(registry.take_current("09:00", second_generation - 1).is_none());
        assert!(registry.take_current("09:00", second_generation).is_some());
        assert!(registry.is_empty());
        second.abort();
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let mut registry = SlotRegistry::new();
        let timers: Vec<_> = (0..3).map(|_| pending_timer()).collect();
        for (i, timer) in timers.iter().enumerate() {
            let entry = armed(&mut registry, &format!("slot-{}", i), timer);
            registry.insert(entry);
        }

        assert!(registry.contains("slot-1"));
        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        for timer in timers {
            assert!(timer.await.unwrap_err().is_cancelled());
        }
    }

    #[tokio::test]
    async fn test_cancel_one() {
        let mut registry = SlotRegistry::new();
        let timer = pending_timer();
        let entry = armed(&mut registry, "12:00", &timer);
        registry.insert(entry);

        assert!(registry.cancel("12:00"));
        assert!(!registry.cancel("12:00"));
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}

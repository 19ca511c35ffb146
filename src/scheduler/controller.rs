//! Session lifecycle controller
//!
//! Single entry point for the refresh schedule. Owns the slot registry and
//! the lifecycle state behind one mutex, so arming, cancelling and the
//! fire-then-rearm step of a timer are serialized even on a multi-threaded
//! runtime. Refreshes themselves run on separate tasks and never hold it.
//!
//! ```text
//!            start()                 pause()
//!  Stopped ───────────▶ Running ───────────▶ Paused
//!     ▲                   │  ▲                 │
//!     │      stop()       │  └──── resume() ───┤
//!     └───────────────────┴────────────────────┘
//!                                 stop()
//! ```

use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::market::{MarketCalendar, MarketStatus, SessionClock, SystemClock};
use crate::refresh::DataRefresh;
use crate::scheduler::dispatcher::{DispatchOutcome, RefreshDispatcher, MANUAL_CONTEXT};
use crate::scheduler::registry::{ArmedSlot, ArmedSlotInfo, SlotRegistry};
use crate::scheduler::{rearm, ScheduleSlot, SchedulerEvent, Visibility};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Running,
    Paused,
}

impl LifecycleState {
    /// Whether the controller intends its slots to be armed.
    /// A paused controller keeps this intent; a stopped one does not.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Paused)
    }
}

struct Core {
    state: LifecycleState,
    registry: SlotRegistry,
}

struct Inner {
    slots: Vec<ScheduleSlot>,
    calendar: MarketCalendar,
    clock: Arc<dyn SessionClock>,
    core: Mutex<Core>,
    dispatcher: RefreshDispatcher,
    events: broadcast::Sender<SchedulerEvent>,
    visibility_attached: AtomicBool,
    runtime: Handle,
}

/// Drives periodic refreshes aligned with market-session boundaries.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create a controller on the system clock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SessionConfig, refresh: Arc<dyn DataRefresh>) -> Result<Self> {
        Self::with_clock(config, refresh, Arc::new(SystemClock))
    }

    /// Create a controller reading time from `clock`
    pub fn with_clock(
        config: SessionConfig,
        refresh: Arc<dyn DataRefresh>,
        clock: Arc<dyn SessionClock>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Runtime(format!("No tokio runtime available: {}", e)))?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let dispatcher = RefreshDispatcher::new(
            refresh,
            config.allow_overlapping_refresh,
            clock.clone(),
            events.clone(),
            runtime.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                calendar: MarketCalendar::from_config(&config),
                slots: config.slots,
                clock,
                core: Mutex::new(Core {
                    state: LifecycleState::Stopped,
                    registry: SlotRegistry::new(),
                }),
                dispatcher,
                events,
                visibility_attached: AtomicBool::new(false),
                runtime,
            }),
        })
    }

    /// Arm every configured slot. No-op while already running.
    pub fn start(&self) {
        let mut core = self.inner.core.lock();
        if core.state == LifecycleState::Running {
            debug!("Session scheduler already running");
            return;
        }

        info!("Starting session scheduler with {} slots", self.inner.slots.len());
        self.inner.arm_all(&mut core);
        self.inner.set_state(&mut core, LifecycleState::Running);
    }

    /// Cancel every timer and drop the intent to run
    pub fn stop(&self) {
        let mut core = self.inner.core.lock();
        let cancelled = core.registry.cancel_all();
        info!("Session scheduler stopped, {} timers cancelled", cancelled);
        self.inner.set_state(&mut core, LifecycleState::Stopped);
    }

    /// Cancel every timer but keep the intent to run. Only valid while running.
    pub fn pause(&self) {
        let mut core = self.inner.core.lock();
        if core.state != LifecycleState::Running {
            debug!("Pause ignored in state {:?}", core.state);
            return;
        }

        let cancelled = core.registry.cancel_all();
        info!("Session scheduler paused, {} timers cancelled", cancelled);
        self.inner.set_state(&mut core, LifecycleState::Paused);
    }

    /// Rearm every slot from the current instant. No-op unless paused,
    /// so a resume after `stop()` (or without `start()`) does nothing.
    pub fn resume(&self) {
        let mut core = self.inner.core.lock();
        if core.state != LifecycleState::Paused {
            debug!("Resume ignored in state {:?}", core.state);
            return;
        }

        info!("Resuming session scheduler");
        self.inner.arm_all(&mut core);
        self.inner.set_state(&mut core, LifecycleState::Running);
    }

    /// Arm (or re-arm) a single slot. Any timer already registered under the
    /// slot's name is cancelled first.
    pub fn schedule_at(&self, slot: ScheduleSlot) -> Option<ArmedSlotInfo> {
        let mut core = self.inner.core.lock();
        self.inner.arm_locked(&mut core, slot)
    }

    /// Refresh immediately under the `manual` context, bypassing the schedule
    pub async fn refresh_now(&self) -> DispatchOutcome {
        self.inner.dispatcher.dispatch(MANUAL_CONTEXT).await
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.core.lock().state
    }

    /// Armed slots ordered by next firing
    pub fn armed_slots(&self) -> Vec<ArmedSlotInfo> {
        self.inner.core.lock().registry.snapshot()
    }

    pub fn dispatcher(&self) -> &RefreshDispatcher {
        &self.inner.dispatcher
    }

    /// Subscribe to scheduler diagnostics
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_trading_day(&self) -> bool {
        self.inner.calendar.is_trading_day_at(self.inner.clock.now_utc())
    }

    pub fn market_status(&self) -> MarketStatus {
        self.inner.calendar.status_at(self.inner.clock.now_utc())
    }

    pub fn next_market_open(&self) -> Option<DateTime<Utc>> {
        self.inner.calendar.next_market_open(self.inner.clock.now_utc())
    }

    /// Follow the host's visibility signal: pause when backgrounded, resume
    /// when foregrounded. Only one signal may be attached per controller.
    pub fn attach_visibility(
        &self,
        mut visibility: watch::Receiver<Visibility>,
    ) -> Result<JoinHandle<()>> {
        if self.inner.visibility_attached.swap(true, Ordering::AcqRel) {
            return Err(AppError::Internal(
                "Visibility signal already attached".into(),
            ));
        }

        let weak = Arc::downgrade(&self.inner);
        Ok(self.inner.runtime.spawn(async move {
            while visibility.changed().await.is_ok() {
                let current = *visibility.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let controller = SessionController { inner };
                debug!("Visibility changed to {:?}", current);
                match current {
                    Visibility::Background => controller.pause(),
                    Visibility::Foreground => controller.resume(),
                }
            }
            debug!("Visibility listener finished");
        }))
    }
}

impl Inner {
    fn set_state(&self, core: &mut Core, state: LifecycleState) {
        core.state = state;
        let _ = self.events.send(SchedulerEvent::Lifecycle { state });
    }

    fn arm_all(self: &Arc<Self>, core: &mut Core) {
        for slot in &self.slots {
            self.arm_locked(core, slot.clone());
        }
    }

    fn arm_locked(self: &Arc<Self>, core: &mut Core, slot: ScheduleSlot) -> Option<ArmedSlotInfo> {
        self.arm_after(core, slot, DateTime::<Utc>::MIN_UTC)
    }

    /// Arm `slot` for its first occurrence strictly after `after` (and now)
    fn arm_after(
        self: &Arc<Self>,
        core: &mut Core,
        slot: ScheduleSlot,
        after: DateTime<Utc>,
    ) -> Option<ArmedSlotInfo> {
        let now = self.clock.now_utc();
        let Some(plan) = rearm::plan_after(now, after, slot.at, self.calendar.timezone()) else {
            error!(
                "Cannot compute next occurrence of slot {} ({}) after {}",
                slot.name, slot.at, now
            );
            core.registry.cancel(&slot.name);
            return None;
        };

        let generation = core.registry.next_generation();
        let weak: Weak<Inner> = Arc::downgrade(self);
        let name = slot.name.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(plan.delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(&name, generation);
            }
        });

        info!(
            "Slot {} ({}) armed for {}, next in {}",
            slot.name,
            slot.context,
            plan.fires_at,
            rearm::describe(plan.delay)
        );
        let _ = self.events.send(SchedulerEvent::SlotArmed {
            name: slot.name.clone(),
            fires_at: plan.fires_at,
            delay_secs: plan.delay.as_secs(),
        });

        let info = ArmedSlotInfo {
            name: slot.name.clone(),
            context: slot.context.clone(),
            fires_at: plan.fires_at,
            delay: plan.delay,
        };
        core.registry
            .insert(ArmedSlot::new(slot, plan, generation, timer.abort_handle()));
        Some(info)
    }

    fn fire(self: &Arc<Self>, name: &str, generation: u64) {
        let mut core = self.core.lock();
        // Cancelled or replaced after this timer woke up
        let Some(armed) = core.registry.take_current(name, generation) else {
            debug!("Stale timer for slot {} ignored", name);
            return;
        };

        let fired_at = armed.plan.fires_at;
        let slot = armed.slot;
        info!("Slot {} fired, refreshing '{}'", slot.name, slot.context);
        let _ = self.events.send(SchedulerEvent::SlotFired {
            name: slot.name.clone(),
            context: slot.context.clone(),
        });

        self.dispatcher.spawn_dispatch(&slot.context);
        // The wall clock may read slightly behind the occurrence that woke us
        self.arm_after(&mut core, slot, fired_at);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.core.get_mut().registry.cancel_all();
    }
}

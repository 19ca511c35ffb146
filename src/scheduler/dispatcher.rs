//! Refresh dispatcher
//!
//! Runs the data refresh collaborator under a context label. Failures are
//! logged and recorded for diagnostics only: they are never retried and never
//! reach the scheduler, so later slots fire regardless of earlier outcomes.
//!
//! Unless overlapping refreshes are allowed, a dispatch that starts while
//! another one is in flight is skipped rather than queued.

use crate::error::ErrorResponse;
use crate::market::SessionClock;
use crate::refresh::DataRefresh;
use crate::scheduler::SchedulerEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Context label used by manual refreshes
pub const MANUAL_CONTEXT: &str = "manual";

/// Result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    Failed { error: ErrorResponse },
    Skipped,
}

/// Last dispatch recorded for a context
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRecord {
    pub dispatch_id: String,
    pub context: String,
    pub outcome: DispatchOutcome,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub elapsed: Duration,
}

struct DispatcherInner {
    refresh: Arc<dyn DataRefresh>,
    allow_overlap: bool,
    clock: Arc<dyn SessionClock>,
    in_flight: AtomicUsize,
    last_outcomes: DashMap<String, RefreshRecord>,
    events: broadcast::Sender<SchedulerEvent>,
    runtime: Handle,
}

/// Releases an in-flight slot when the refresh ends, including on panic
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Invokes the refresh collaborator on behalf of the scheduler
#[derive(Clone)]
pub struct RefreshDispatcher {
    inner: Arc<DispatcherInner>,
}

impl RefreshDispatcher {
    pub fn new(
        refresh: Arc<dyn DataRefresh>,
        allow_overlap: bool,
        clock: Arc<dyn SessionClock>,
        events: broadcast::Sender<SchedulerEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                refresh,
                allow_overlap,
                clock,
                in_flight: AtomicUsize::new(0),
                last_outcomes: DashMap::new(),
                events,
                runtime,
            }),
        }
    }

    /// Run a refresh on its own task so the caller never waits on it
    pub fn spawn_dispatch(&self, context: &str) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.clone();
        let context = context.to_string();
        self.inner
            .runtime
            .spawn(async move { dispatcher.dispatch(&context).await })
    }

    /// Run a refresh and wait for its outcome
    pub async fn dispatch(&self, context: &str) -> DispatchOutcome {
        let dispatch_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let Some(_guard) = self.acquire() else {
            info!(
                "Refresh '{}' skipped: another refresh is in flight",
                context
            );
            return self.record(dispatch_id, context, DispatchOutcome::Skipped, started);
        };

        info!("Refresh '{}' started ({})", context, dispatch_id);
        let outcome = match self.inner.refresh.refresh().await {
            Ok(()) => {
                info!(
                    "Refresh '{}' completed in {}ms",
                    context,
                    started.elapsed().as_millis()
                );
                DispatchOutcome::Completed
            }
            Err(e) => {
                warn!("Refresh '{}' failed: {}", context, e);
                DispatchOutcome::Failed {
                    error: ErrorResponse::from(&e),
                }
            }
        };

        self.record(dispatch_id, context, outcome, started)
    }

    fn acquire(&self) -> Option<InFlightGuard<'_>> {
        let in_flight = &self.inner.in_flight;
        if self.inner.allow_overlap {
            in_flight.fetch_add(1, Ordering::AcqRel);
        } else if in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(InFlightGuard(in_flight))
    }

    fn record(
        &self,
        dispatch_id: String,
        context: &str,
        outcome: DispatchOutcome,
        started: Instant,
    ) -> DispatchOutcome {
        self.inner.last_outcomes.insert(
            context.to_string(),
            RefreshRecord {
                dispatch_id: dispatch_id.clone(),
                context: context.to_string(),
                outcome: outcome.clone(),
                finished_at: self.inner.clock.now_utc(),
                elapsed: started.elapsed(),
            },
        );

        // No subscribers is fine
        let _ = self.inner.events.send(SchedulerEvent::Refresh {
            context: context.to_string(),
            dispatch_id,
            outcome: outcome.clone(),
        });

        outcome
    }

    /// Number of refreshes currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Most recent dispatch recorded for `context`
    pub fn last_outcome(&self, context: &str) -> Option<RefreshRecord> {
        self.inner.last_outcomes.get(context).map(|r| r.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CountingRefresh, GatedRefresh};
    use super::*;
    use crate::market::clock::testing::ist;
    use crate::market::{ManualClock, SystemClock};

    fn dispatcher(refresh: Arc<dyn DataRefresh>, allow_overlap: bool) -> RefreshDispatcher {
        let (events, _) = broadcast::channel(16);
        RefreshDispatcher::new(
            refresh,
            allow_overlap,
            Arc::new(SystemClock),
            events,
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_propagated() {
        let refresh = Arc::new(CountingRefresh::failing());
        let dispatcher = dispatcher(refresh.clone(), false);

        let outcome = dispatcher.dispatch("mid-day").await;
        match outcome {
            DispatchOutcome::Failed { error } => assert_eq!(error.code, "REFRESH_ERROR"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let record = dispatcher.last_outcome("mid-day").unwrap();
        assert!(matches!(record.outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(dispatcher.in_flight(), 0);

        // Not retried
        assert_eq!(refresh.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_emits_event() {
        let (events, mut rx) = broadcast::channel(16);
        let dispatcher = RefreshDispatcher::new(
            Arc::new(CountingRefresh::default()),
            false,
            Arc::new(SystemClock),
            events,
            Handle::current(),
        );

        assert_eq!(dispatcher.dispatch(MANUAL_CONTEXT).await, DispatchOutcome::Completed);
        match rx.recv().await.unwrap() {
            SchedulerEvent::Refresh { context, outcome, .. } => {
                assert_eq!(context, MANUAL_CONTEXT);
                assert_eq!(outcome, DispatchOutcome::Completed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_uses_session_clock() {
        let (events, _) = broadcast::channel(16);
        let dispatcher = RefreshDispatcher::new(
            Arc::new(CountingRefresh::default()),
            false,
            Arc::new(ManualClock::new(ist(2026, 10, 19, 15, 35))),
            events,
            Handle::current(),
        );

        dispatcher.dispatch("post-close").await;
        let record = dispatcher.last_outcome("post-close").unwrap();
        assert_eq!(record.finished_at, ist(2026, 10, 19, 15, 35));
    }

    #[tokio::test]
    async fn test_overlapping_dispatch_is_skipped() {
        let refresh = Arc::new(GatedRefresh::new());
        let dispatcher = dispatcher(refresh.clone(), false);

        let first = dispatcher.spawn_dispatch("12:00");
        while refresh.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.in_flight(), 1);

        assert_eq!(dispatcher.dispatch(MANUAL_CONTEXT).await, DispatchOutcome::Skipped);

        refresh.gate.add_permits(1);
        assert_eq!(first.await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlap_allowed() {
        let refresh = Arc::new(GatedRefresh::new());
        let dispatcher = dispatcher(refresh.clone(), true);

        let first = dispatcher.spawn_dispatch("15:35");
        let second = dispatcher.spawn_dispatch(MANUAL_CONTEXT);
        while refresh.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.in_flight(), 2);

        refresh.gate.add_permits(2);
        assert_eq!(first.await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(second.await.unwrap(), DispatchOutcome::Completed);
    }
}

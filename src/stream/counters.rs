//! Live counters for streaming sessions and their background workers.
//!
//! Guards increment a gauge on creation and decrement it on drop, so a
//! session that exits through any path (including a panic unwinding its
//! task) is accounted for.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::session::SessionOutcome;

/// Shared session instrumentation.
#[derive(Debug, Default)]
pub struct SessionCounters {
    active_sessions: AtomicUsize,
    active_workers: AtomicUsize,
    completed: AtomicU64,
    timed_out: AtomicU64,
    disconnected: AtomicU64,
}

impl SessionCounters {
    /// Create a fresh set of counters behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions currently running their event loop.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Background workers that have not yet exited.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Total sessions that ended with the given outcome.
    #[must_use]
    pub fn finished(&self, outcome: SessionOutcome) -> u64 {
        self.tally(outcome).load(Ordering::SeqCst)
    }

    /// Mark a session as running until the guard drops.
    #[must_use]
    pub fn enter_session(self: &Arc<Self>) -> ActiveGuard {
        ActiveGuard::new(Arc::clone(self), Gauge::Sessions)
    }

    /// Mark a worker as running until the guard drops.
    #[must_use]
    pub fn enter_worker(self: &Arc<Self>) -> ActiveGuard {
        ActiveGuard::new(Arc::clone(self), Gauge::Workers)
    }

    pub(crate) fn record(&self, outcome: SessionOutcome) {
        self.tally(outcome).fetch_add(1, Ordering::SeqCst);
    }

    fn tally(&self, outcome: SessionOutcome) -> &AtomicU64 {
        match outcome {
            SessionOutcome::Completed => &self.completed,
            SessionOutcome::TimedOut => &self.timed_out,
            SessionOutcome::Disconnected => &self.disconnected,
        }
    }

    fn gauge(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::Sessions => &self.active_sessions,
            Gauge::Workers => &self.active_workers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    Sessions,
    Workers,
}

/// RAII guard returned by [`SessionCounters::enter_session`] and
/// [`SessionCounters::enter_worker`].
#[derive(Debug)]
pub struct ActiveGuard {
    counters: Arc<SessionCounters>,
    gauge: Gauge,
}

impl ActiveGuard {
    fn new(counters: Arc<SessionCounters>, gauge: Gauge) -> Self {
        counters.gauge(gauge).fetch_add(1, Ordering::SeqCst);
        Self { counters, gauge }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counters.gauge(self.gauge).fetch_sub(1, Ordering::SeqCst);
    }
}

//! HTTP surface: the `/sse/{id}` stream endpoint, health probe, and server
//! lifecycle.

pub mod routes;
pub mod server;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::stream::counters::SessionCounters;
use crate::worker::runner::TaskRunner;
use crate::worker::workload::{DelayedWorkload, Workload};

/// Shared state handed to every request handler.
#[derive(Debug)]
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Starts one background task per session.
    pub runner: TaskRunner,
    /// Live session and worker instrumentation.
    pub counters: Arc<SessionCounters>,
}

impl AppState {
    /// Build state running the reference delayed workload from `config.task`.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        let workload = Arc::new(DelayedWorkload::new(config.task.delay()));
        Self::with_workload(config, workload)
    }

    /// Build state running a caller-supplied workload.
    #[must_use]
    pub fn with_workload(config: GlobalConfig, workload: Arc<dyn Workload>) -> Self {
        let counters = SessionCounters::shared();
        Self {
            runner: TaskRunner::new(workload, Arc::clone(&counters)),
            config: Arc::new(config),
            counters,
        }
    }
}

//! Units of background work a session waits on.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::models::status::StatusMessage;
use crate::Result;

/// Future returned by [`Workload::execute`].
pub type WorkloadFuture = Pin<Box<dyn Future<Output = Result<StatusMessage>> + Send + 'static>>;

/// Asynchronous work started once per session.
///
/// The returned future owns everything it needs; it may be dropped at any
/// await point when the session ends first.
pub trait Workload: Send + Sync {
    /// Start processing on behalf of the stream described by `initial`.
    ///
    /// Resolves to the message the session should emit on completion. An
    /// `Err` is converted into a completed failure message by the runner.
    fn execute(&self, initial: StatusMessage) -> WorkloadFuture;
}

/// Reference workload: waits a fixed delay, then reports success.
#[derive(Debug, Clone, Copy)]
pub struct DelayedWorkload {
    delay: Duration,
}

impl DelayedWorkload {
    /// Create a workload that completes after `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Workload for DelayedWorkload {
    fn execute(&self, initial: StatusMessage) -> WorkloadFuture {
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(initial.succeeded())
        })
    }
}

//! Background task runner with a one-shot completion signal.
//!
//! [`TaskRunner::start`] spawns the session's workload on its own tokio task
//! and returns a [`Completion`] that resolves at most once. The worker never
//! touches the stream sink; its only output is the value sent through the
//! `oneshot` channel.
//!
//! The worker also watches a [`CancellationToken`]. When the session ends
//! first (deadline or disconnect) the token is cancelled, the workload future
//! is dropped and the worker exits without sending anything. If the session
//! ends between the workload finishing and the send, the send fails against
//! the dropped receiver and the value is discarded.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::workload::Workload;
use crate::models::status::StatusMessage;
use crate::stream::counters::SessionCounters;

/// Starts one workload per session.
#[derive(Clone)]
pub struct TaskRunner {
    workload: Arc<dyn Workload>,
    counters: Arc<SessionCounters>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").finish_non_exhaustive()
    }
}

impl TaskRunner {
    /// Create a runner for `workload`, reporting worker liveness to `counters`.
    #[must_use]
    pub fn new(workload: Arc<dyn Workload>, counters: Arc<SessionCounters>) -> Self {
        Self { workload, counters }
    }

    /// Spawn the workload for `initial` and return its completion signal.
    ///
    /// A workload error is delivered as a completed message whose text
    /// describes the failure, so the session closes the stream normally.
    #[must_use]
    pub fn start(&self, initial: StatusMessage, cancel: CancellationToken) -> Completion {
        let (tx, rx) = oneshot::channel();
        let guard = self.counters.enter_worker();
        let work = self.workload.execute(initial.clone());
        let span = info_span!("background_task", stream_id = %initial.id);

        tokio::spawn(
            async move {
                let _guard = guard;

                let result = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("session ended first; abandoning task");
                        return;
                    }
                    result = work => result,
                };

                let terminal = match result {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(%err, "background task failed");
                        initial.failed(&err.to_string())
                    }
                };

                if tx.send(terminal).is_err() {
                    debug!("session gone; discarding task result");
                }
            }
            .instrument(span),
        );

        Completion { rx: Some(rx) }
    }
}

/// Receiving side of a task's one-shot completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: Option<oneshot::Receiver<StatusMessage>>,
}

impl Completion {
    /// Wait for the task result.
    ///
    /// Cancel-safe: dropping the returned future before it resolves leaves
    /// the signal armed. Yields `Some` at most once; afterwards, or when the
    /// worker exited without a result, returns `None` once and then stays
    /// pending forever.
    pub async fn recv(&mut self) -> Option<StatusMessage> {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let result = rx.await;
        self.rx = None;
        result.ok()
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.rx.is_some()
    }
}

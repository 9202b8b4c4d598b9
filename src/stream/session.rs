//! Per-connection streaming session.
//!
//! A [`Session`] owns one connection's lifecycle. It starts the background
//! task, then loops over a single `tokio::select!` that consumes exactly one
//! ready input per iteration:
//!
//! - the task's one-shot completion signal,
//! - the deadline, fixed when the session is created,
//! - the heartbeat, a fresh sleep armed on every iteration.
//!
//! Terminal inputs are checked first. Write failures on any path end the
//! session immediately without a close frame; encode failures only drop the
//! frame being built. Every write is bounded by the deadline, so a peer that
//! stays connected but stops reading cannot hold the session open past it.
//!
//! ```text
//! WAITING ──heartbeat──▶ WAITING
//!    │
//!    ├── completion(completed) ──▶ COMPLETED   (status frame + close frame)
//!    ├── deadline ───────────────▶ TIMED_OUT   (close frame)
//!    └── write error ────────────▶ DISCONNECTED (nothing more)
//! ```

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::{close_frame, FrameEncoder, JsonFrameEncoder};
use super::counters::SessionCounters;
use super::sink::FrameSink;
use crate::config::StreamConfig;
use crate::models::status::StatusMessage;
use crate::worker::runner::{Completion, TaskRunner};
use crate::{AppError, Result};

/// Timing and payload settings for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Delay between heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Time from session creation until the stream is closed.
    pub deadline: Duration,
    /// Run the background task and emit the `status` field.
    pub with_completion: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for SessionSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            deadline: config.deadline(),
            with_completion: config.with_completion,
        }
    }
}

/// Terminal state a session ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOutcome {
    /// The task reported completion; status and close frames were sent.
    Completed,
    /// The deadline elapsed; a close frame was sent.
    TimedOut,
    /// A write failed; nothing further was sent.
    Disconnected,
}

impl SessionOutcome {
    /// Lowercase label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
        }
    }
}

impl Display for SessionOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Frames accepted by the sink, close frame included.
    pub frames_sent: usize,
    /// Frames dropped because they could not be encoded.
    pub frames_skipped: usize,
}

/// Result of trying to emit one frame.
enum Emit {
    Sent,
    Skipped,
    Disconnected,
}

/// One connection's streaming state machine.
pub struct Session {
    current: StatusMessage,
    settings: SessionSettings,
    deadline_at: Instant,
    encoder: Arc<dyn FrameEncoder>,
    runner: Option<TaskRunner>,
    counters: Arc<SessionCounters>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("current", &self.current)
            .field("settings", &self.settings)
            .field("deadline_at", &self.deadline_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session for stream `id`. The deadline starts counting now.
    #[must_use]
    pub fn new(id: impl Into<String>, settings: SessionSettings, counters: Arc<SessionCounters>) -> Self {
        Self {
            current: StatusMessage::initial(id),
            deadline_at: Instant::now() + settings.deadline,
            encoder: Arc::new(JsonFrameEncoder::new(settings.with_completion)),
            settings,
            runner: None,
            counters,
        }
    }

    /// Use `runner` for the background task.
    ///
    /// Ignored when completion is disabled in the settings.
    #[must_use]
    pub fn with_runner(mut self, runner: TaskRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Replace the default JSON frame encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.current.id
    }

    /// Drive the session to a terminal state, writing frames into `sink`.
    ///
    /// The sink is dropped and any unfinished background task is cancelled
    /// before this returns.
    pub async fn run<S: FrameSink>(self, sink: S) -> SessionReport {
        let span = info_span!("sse_session", stream_id = %self.current.id);
        self.drive(sink).instrument(span).await
    }

    async fn drive<S: FrameSink>(mut self, mut sink: S) -> SessionReport {
        let _active = self.counters.enter_session();
        let cancel = CancellationToken::new();
        let _abandon_task = cancel.clone().drop_guard();

        let mut completion = match (&self.runner, self.settings.with_completion) {
            (Some(runner), true) => Some(runner.start(self.current.clone(), cancel.child_token())),
            _ => None,
        };

        let deadline = tokio::time::sleep_until(self.deadline_at);
        tokio::pin!(deadline);

        let mut frames_sent = 0;
        let mut frames_skipped = 0;
        debug!(with_completion = self.settings.with_completion, "session started");

        let outcome = loop {
            tokio::select! {
                biased;

                update = next_completion(&mut completion) => {
                    let Some(update) = update else {
                        warn!("background task ended without a result");
                        completion = None;
                        continue;
                    };

                    let terminal = update.completed;
                    self.current = StatusMessage {
                        id: std::mem::take(&mut self.current.id),
                        timestamp: Utc::now(),
                        ..update
                    };

                    match self.emit(&mut sink).await {
                        Emit::Sent => frames_sent += 1,
                        Emit::Skipped => {
                            frames_skipped += 1;
                            continue;
                        }
                        Emit::Disconnected => break SessionOutcome::Disconnected,
                    }

                    if terminal {
                        if self.write(&mut sink, close_frame()).await.is_err() {
                            info!("peer disconnected before close frame");
                            break SessionOutcome::Disconnected;
                        }
                        frames_sent += 1;
                        break SessionOutcome::Completed;
                    }
                }

                () = &mut deadline => {
                    if self.write(&mut sink, close_frame()).await.is_err() {
                        info!("peer disconnected before close frame");
                        break SessionOutcome::Disconnected;
                    }
                    frames_sent += 1;
                    break SessionOutcome::TimedOut;
                }

                () = tokio::time::sleep(self.settings.heartbeat_interval) => {
                    self.current.stamp_heartbeat(Utc::now());
                    match self.emit(&mut sink).await {
                        Emit::Sent => frames_sent += 1,
                        Emit::Skipped => frames_skipped += 1,
                        Emit::Disconnected => break SessionOutcome::Disconnected,
                    }
                }
            }
        };

        self.counters.record(outcome);
        info!(%outcome, frames_sent, frames_skipped, "session ended");

        SessionReport {
            outcome,
            frames_sent,
            frames_skipped,
        }
    }

    /// Encode the current message and write it to `sink`.
    async fn emit<S: FrameSink>(&self, sink: &mut S) -> Emit {
        let frame = match self.encoder.encode(&self.current) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "failed to encode status frame; skipping");
                return Emit::Skipped;
            }
        };

        match self.write(sink, frame).await {
            Ok(()) => Emit::Sent,
            Err(err) => {
                info!(%err, "peer disconnected");
                Emit::Disconnected
            }
        }
    }

    /// Write one frame, giving up once the deadline has passed.
    ///
    /// A write that is already ready completes even at the deadline, so the
    /// close frame still goes out to a peer that is keeping up.
    async fn write<S: FrameSink>(&self, sink: &mut S, frame: Bytes) -> Result<()> {
        tokio::time::timeout_at(self.deadline_at, sink.write(frame))
            .await
            .unwrap_or_else(|_| Err(AppError::Disconnected("peer stopped reading before the deadline".into())))
    }
}

/// Wait on the completion signal, or forever when there is none.
async fn next_completion(completion: &mut Option<Completion>) -> Option<StatusMessage> {
    match completion {
        Some(completion) => completion.recv().await,
        None => std::future::pending().await,
    }
}

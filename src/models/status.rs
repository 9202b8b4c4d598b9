//! Status payload carried by every stream frame.

use chrono::{DateTime, SecondsFormat, Utc};

/// Text carried by the message before the first heartbeat.
pub const WAITING_TEXT: &str = "wait queue";

/// Text set by the reference workload on success.
pub const SUCCESS_TEXT: &str = "success";

/// Latest known state of one stream.
///
/// The session loop is the only writer; the background task hands back a
/// replacement value instead of mutating a shared copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Stream identifier taken verbatim from the request path.
    pub id: String,
    /// Emission time of the frame carrying this message.
    pub timestamp: DateTime<Utc>,
    /// Human-readable status description.
    pub text: String,
    /// Whether the background task has finished.
    pub completed: bool,
}

impl StatusMessage {
    /// Build the message a new session starts from.
    #[must_use]
    pub fn initial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            text: WAITING_TEXT.into(),
            completed: false,
        }
    }

    /// Refresh timestamp and text for a heartbeat emitted at `now`.
    ///
    /// Heartbeats are never terminal, so the completion flag is cleared.
    pub fn stamp_heartbeat(&mut self, now: DateTime<Utc>) {
        self.timestamp = now;
        self.completed = false;
        self.text = format!(
            "current time is {}",
            now.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }

    /// Terminal message for a task that finished successfully.
    #[must_use]
    pub fn succeeded(mut self) -> Self {
        self.completed = true;
        self.text = SUCCESS_TEXT.into();
        self
    }

    /// Terminal message for a task that failed.
    ///
    /// Still marked completed so the stream closes the same way it does on
    /// success.
    #[must_use]
    pub fn failed(mut self, reason: &str) -> Self {
        self.completed = true;
        self.text = format!("failed: {reason}");
        self
    }
}

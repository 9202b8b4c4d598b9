//! Event frame codec for the SSE wire format.
//!
//! Every frame is a single `data:` line followed by a blank line:
//!
//! ```text
//! data: {"id":"abc","timestamp":"2024-05-01T10:00:00.250Z","message":"success","status":true}
//!
//! ```
//!
//! The terminal frame carries the literal payload `close` instead of JSON.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::status::StatusMessage;
use crate::Result;

/// Prefix of every frame.
pub const DATA_PREFIX: &str = "data: ";

/// Frame delimiter (end of line plus blank line).
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Terminal frame sent on completion or deadline.
pub const CLOSE_FRAME: &[u8] = b"data: close\n\n";

/// JSON shape of a status payload.
#[derive(Debug, Serialize)]
struct WireStatus<'a> {
    id: &'a str,
    timestamp: &'a DateTime<Utc>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<bool>,
}

/// Serialize `msg` into a complete `data: <json>\n\n` frame.
///
/// The `status` field is only written when `with_completion` is set.
///
/// # Errors
///
/// Returns `AppError::Encode` if serialization fails.
pub fn encode(msg: &StatusMessage, with_completion: bool) -> Result<Bytes> {
    let wire = WireStatus {
        id: &msg.id,
        timestamp: &msg.timestamp,
        message: &msg.text,
        status: with_completion.then_some(msg.completed),
    };

    let json = serde_json::to_vec(&wire)?;
    let mut frame = Vec::with_capacity(DATA_PREFIX.len() + json.len() + FRAME_TERMINATOR.len());
    frame.extend_from_slice(DATA_PREFIX.as_bytes());
    frame.extend_from_slice(&json);
    frame.extend_from_slice(FRAME_TERMINATOR.as_bytes());
    Ok(Bytes::from(frame))
}

/// The fixed `data: close\n\n` terminator.
#[must_use]
pub fn close_frame() -> Bytes {
    Bytes::from_static(CLOSE_FRAME)
}

/// Turns status messages into wire frames for a session.
///
/// Sessions hold an encoder behind this trait so payload formats can be
/// swapped without touching the state machine.
pub trait FrameEncoder: Send + Sync {
    /// Encode one status frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Encode` when the message cannot be serialized.
    fn encode(&self, msg: &StatusMessage) -> Result<Bytes>;
}

/// JSON encoder producing the standard `data: <json>\n\n` frames.
#[derive(Debug, Clone, Copy)]
pub struct JsonFrameEncoder {
    with_completion: bool,
}

impl JsonFrameEncoder {
    /// Create an encoder; `with_completion` controls the `status` field.
    #[must_use]
    pub fn new(with_completion: bool) -> Self {
        Self { with_completion }
    }
}

impl FrameEncoder for JsonFrameEncoder {
    fn encode(&self, msg: &StatusMessage) -> Result<Bytes> {
        encode(msg, self.with_completion)
    }
}

/// One frame read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A `data:` frame carrying a JSON status payload.
    Status(String),
    /// The `data: close` terminator.
    Close,
}

/// Incremental splitter for a received SSE body.
///
/// Chunk boundaries on the wire need not line up with frame boundaries, so
/// bytes are buffered until a blank line completes a frame.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    /// Create an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of body bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let terminator = FRAME_TERMINATOR.as_bytes();
        let end = self
            .buf
            .windows(terminator.len())
            .position(|window| window == terminator)?;

        let raw: Vec<u8> = self.buf.drain(..end + terminator.len()).take(end).collect();
        let text = String::from_utf8_lossy(&raw);
        let payload = text.strip_prefix(DATA_PREFIX).unwrap_or(text.as_ref());

        if payload == "close" {
            Some(Frame::Close)
        } else {
            Some(Frame::Status(payload.to_owned()))
        }
    }

    /// Whether bytes of an unfinished frame remain buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

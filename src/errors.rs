//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A status message could not be serialized into a frame.
    ///
    /// Local to the frame being built; the session skips the frame and
    /// keeps streaming.
    Encode(String),
    /// The stream sink rejected a write because the peer is gone.
    Disconnected(String),
    /// A background task failed before producing a result.
    Task(String),
    /// The HTTP listener could not be bound or stopped serving.
    Listener(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Encode(msg) => write!(f, "encode: {msg}"),
            Self::Disconnected(msg) => write!(f, "disconnected: {msg}"),
            Self::Task(msg) => write!(f, "task: {msg}"),
            Self::Listener(msg) => write!(f, "listener: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

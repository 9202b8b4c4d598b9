#![forbid(unsafe_code)]

//! Server-Sent Events status relay.
//!
//! Each `GET /sse/{id}` request gets its own [`stream::session::Session`]
//! that interleaves heartbeats, a background task's completion signal, a
//! fixed deadline and write-failure detection into one ordered frame
//! stream.

pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod stream;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

//! Per-connection SSE streaming: frame codec, sink adapter and the session
//! state machine that drives them.

pub mod codec;
pub mod counters;
pub mod session;
pub mod sink;

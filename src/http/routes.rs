//! Request handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::Response;
use tracing::debug;

use super::AppState;
use crate::stream::session::{Session, SessionSettings};
use crate::stream::sink::{into_body_stream, ChannelSink};

/// Handler for `GET /health`. Returns 200 OK with a plain-text body.
pub async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /sse/{id}`.
///
/// Creates a [`Session`] for `id`, spawns its event loop, and returns the
/// `200` streaming response straight away. Frames flow from the session
/// through a [`ChannelSink`] into the chunked body; the body ends when the
/// session drops its sink.
pub async fn stream_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let stream_config = &state.config.stream;
    let (sink, rx) = ChannelSink::channel(stream_config.frame_buffer);

    let session = Session::new(
        id,
        SessionSettings::from(stream_config),
        Arc::clone(&state.counters),
    )
    .with_runner(state.runner.clone());
    debug!(stream_id = session.id(), "accepted stream request");

    tokio::spawn(async move {
        session.run(sink).await;
    });

    let mut response = Response::new(Body::from_stream(into_body_stream(rx)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

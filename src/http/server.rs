//! Router construction and listener lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::routes::{health, stream_status};
use super::AppState;
use crate::config::CorsConfig;
use crate::{AppError, Result};

/// Build the application router.
///
/// Routes:
/// - `GET /sse/{id}`: status stream for `id`.
/// - `GET /health`: liveness probe.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors);
    Router::new()
        .route("/sse/{id}", get(stream_status))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Translate [`CorsConfig`] into a [`CorsLayer`].
///
/// A `"*"` entry allows any origin. Entries that are not valid header
/// values are skipped with a warning.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allow_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allow_origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|err| warn!(origin = %origin, %err, "ignoring invalid CORS origin"))
                .ok()
        }))
    };

    let headers = AllowHeaders::list(config.allow_headers.iter().filter_map(|name| {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| warn!(header = %name, %err, "ignoring invalid CORS header"))
            .ok()
    }));

    CorsLayer::new()
        .allow_origin(origins)
        .allow_headers(headers)
        .allow_methods([Method::GET])
        .allow_credentials(false)
}

/// Bind the HTTP listener.
///
/// # Errors
///
/// Returns `AppError::Listener` if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Listener(format!("failed to bind {addr}: {err}")))
}

/// Serve the router on `listener` until `ct` is cancelled.
///
/// Streams already in flight keep running after cancellation until they
/// reach a terminal state; callers that cannot wait should bound the
/// returned future with a timeout.
///
/// # Errors
///
/// Returns `AppError::Listener` if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Listener(format!("listener has no local address: {err}")))?;
    info!(%local, "starting HTTP/SSE server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Listener(format!("server error: {err}")))?;

    info!("HTTP/SSE server shut down");
    Ok(())
}

//! Stream sink adapter between the session loop and the HTTP body.
//!
//! The session writes complete frames into a [`FrameSink`]. The production
//! sink, [`ChannelSink`], pushes frames through a bounded `tokio::sync::mpsc`
//! channel whose receiver is turned into the streaming response body by
//! [`into_body_stream`]. When the client goes away, hyper drops the body,
//! the receiver goes with it, and the next write reports
//! [`AppError::Disconnected`].

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::{AppError, Result};

/// Destination for encoded frames.
///
/// Only the owning session loop calls [`write`](Self::write); the sink never
/// sees concurrent writers.
pub trait FrameSink: Send {
    /// Deliver one frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Disconnected` once the peer is gone. Every later
    /// call must fail the same way.
    fn write(&mut self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// [`FrameSink`] backed by a bounded channel feeding a response body.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink and the receiving half for the response body.
    ///
    /// `capacity` bounds how many frames may sit unread between the session
    /// and the connection. A capacity of zero is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn write(&mut self, frame: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.tx
                .send(frame)
                .await
                .map_err(|_| AppError::Disconnected("response body dropped by peer".into()))
        })
    }
}

/// Adapt the receiving half of a [`ChannelSink`] into a body stream.
///
/// The stream ends when the session drops its sink.
pub fn into_body_stream(
    rx: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<Bytes, Infallible>(frame), rx))
    })
}

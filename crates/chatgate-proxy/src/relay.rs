//! Streaming response relay.
//!
//! A [`StreamRelay`] is the write half of a response body. Each write becomes
//! its own body frame and is handed to the HTTP server immediately, so SSE
//! events reach the client as soon as they are produced.

use std::error::Error as StdError;
use std::io;

use axum::body::Body;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use hyper::upgrade::OnUpgrade;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::transport::is_benign_disconnect;

/// Frames buffered between the writer and the connection.
pub const RELAY_CAPACITY: usize = 16;

type Frame = Result<Bytes, io::Error>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The client hung up; nothing more can be written.
    #[error("client disconnected")]
    ClientGone,

    /// The inbound connection does not offer the requested capability.
    #[error("connection does not support this operation")]
    Unsupported,

    /// The relayed source failed mid-stream. The original error is kept so
    /// resets and broken pipes can still be told apart.
    #[error("source stream failed: {0}")]
    Source(#[source] Box<dyn StdError + Send + Sync>),
}

impl RelayError {
    /// Whether either side simply went away.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::ClientGone => true,
            Self::Unsupported => false,
            Self::Source(e) => is_benign_disconnect(e.as_ref()),
        }
    }
}

/// Write half of a streamed response body.
///
/// The gateway drives it through [`pump`](Self::pump). The single-write
/// methods, [`flush`](Self::flush), [`has_written`](Self::has_written) and
/// [`take_upgrade`](Self::take_upgrade) are there for hosts that mount the
/// router and produce bodies of their own.
#[derive(Debug)]
pub struct StreamRelay {
    tx: mpsc::Sender<Frame>,
    bytes_written: u64,
    written: bool,
    upgrade: Option<OnUpgrade>,
}

impl StreamRelay {
    /// Create a relay and the response body it feeds.
    ///
    /// `upgrade` is the inbound connection's upgrade handle, when the client
    /// asked for one.
    pub fn channel(upgrade: Option<OnUpgrade>) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(RELAY_CAPACITY);
        let relay = Self {
            tx,
            bytes_written: 0,
            written: false,
            upgrade,
        };
        (relay, Body::from_stream(ReceiverStream::new(rx)))
    }

    /// Write one chunk as its own frame. Empty chunks are skipped.
    pub async fn write(&mut self, chunk: Bytes) -> Result<usize, RelayError> {
        if chunk.is_empty() {
            return Ok(0);
        }
        let len = chunk.len();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| RelayError::ClientGone)?;
        self.written = true;
        self.bytes_written += len as u64;
        Ok(len)
    }

    pub async fn write_str(&mut self, chunk: &str) -> Result<usize, RelayError> {
        self.write(Bytes::copy_from_slice(chunk.as_bytes())).await
    }

    /// Frames are delivered as they are written; this only reports whether
    /// the client is still there.
    pub fn flush(&self) -> Result<(), RelayError> {
        if self.tx.is_closed() {
            Err(RelayError::ClientGone)
        } else {
            Ok(())
        }
    }

    /// Resolves once the client has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub const fn has_written(&self) -> bool {
        self.written
    }

    /// Hand over the inbound connection's upgrade handle.
    pub fn take_upgrade(&mut self) -> Result<OnUpgrade, RelayError> {
        self.upgrade.take().ok_or(RelayError::Unsupported)
    }

    /// End the body with an error so the client sees a truncated stream
    /// rather than a clean end.
    pub async fn abort(self, error: io::Error) {
        // The client may already be gone; there is nobody left to tell.
        let _ = self.tx.send(Err(error)).await;
    }

    /// Copy every chunk of `source` to the client.
    ///
    /// Returns [`RelayError::ClientGone`] as soon as the client hangs up,
    /// even while the source is idle, so the source is dropped promptly.
    /// A source failure aborts the body and is returned as
    /// [`RelayError::Source`].
    pub async fn pump<S, E>(&mut self, source: S) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let mut source = std::pin::pin!(source);
        loop {
            let item = tokio::select! {
                biased;
                () = self.tx.closed() => return Err(RelayError::ClientGone),
                item = source.next() => item,
            };
            match item {
                Some(Ok(chunk)) => {
                    self.write(chunk).await?;
                }
                Some(Err(e)) => {
                    let truncated = io::Error::new(source_kind(&e), e.to_string());
                    let _ = self.tx.send(Err(truncated)).await;
                    return Err(RelayError::Source(Box::new(e)));
                }
                None => return Ok(self.bytes_written),
            }
        }
    }
}

/// The first I/O error kind in `error`'s source chain.
fn source_kind(error: &(dyn StdError + 'static)) -> io::ErrorKind {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return io_err.kind();
        }
        current = err.source();
    }
    io::ErrorKind::Other
}

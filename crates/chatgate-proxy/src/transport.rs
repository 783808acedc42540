//! Forwarding transport.
//!
//! Wraps a pooled `reqwest::Client` with the gateway's fixed timeouts,
//! request/response instrumentation, and shutdown cancellation.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method, StatusCode, header};
use bytes::Bytes;
use chatgate_core::interceptor::TEXT_EVENT_STREAM;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Idle connections kept per upstream host.
pub const MAX_IDLE_PER_HOST: usize = 100;
/// How long an idle pooled connection is kept.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// TCP connect plus TLS handshake budget.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed between sending the request and receiving response headers.
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from an upstream call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// No response headers within [`RESPONSE_HEADER_TIMEOUT`].
    #[error("timeout awaiting response headers after {}s", .0.as_secs())]
    Timeout(Duration),

    /// DNS, connect, TLS or write failure.
    #[error("{0}")]
    Request(#[source] reqwest::Error),

    /// Failure while reading a buffered response body.
    #[error("error reading upstream body: {0}")]
    Body(#[source] reqwest::Error),

    /// The gateway is shutting down.
    #[error("upstream call cancelled")]
    Cancelled,
}

/// How a transport failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The peer went away or the call was cancelled; not an error.
    Benign,
    /// A genuine upstream failure; surfaced as 502.
    Upstream,
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cancelled => ErrorClass::Benign,
            Self::Request(e) | Self::Body(e) if is_benign_disconnect(e) => ErrorClass::Benign,
            Self::Client(_) | Self::Timeout(_) | Self::Request(_) | Self::Body(_) => {
                ErrorClass::Upstream
            }
        }
    }
}

/// Whether `error` or anything in its source chain is a broken pipe or a
/// reset/aborted connection.
pub fn is_benign_disconnect(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
            if let Some(inner) = io_err.get_ref() {
                if is_benign_disconnect(inner) {
                    return true;
                }
            }
        }
        current = err.source();
    }
    false
}

/// A fully rewritten request ready to go upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The caller asked for incremental delivery.
    pub streaming: bool,
}

/// Upstream body chunks as they arrive.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

pub enum UpstreamBody {
    /// Relayed chunk by chunk.
    Stream(ByteStream),
    /// Read in full before relaying.
    Buffered(Bytes),
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains(TEXT_EVENT_STREAM))
}

/// Pooled client for the single upstream.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    cancel: CancellationToken,
}

impl UpstreamClient {
    /// Build a client whose in-flight calls end when `cancel` fires.
    pub fn new(cancel: CancellationToken) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client, cancel })
    }

    /// Send `request` and wait for the response head.
    ///
    /// Event-stream responses, and responses to streaming requests, keep a
    /// live body stream. Everything else is buffered and logged.
    pub async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let start = Instant::now();
        let UpstreamRequest {
            method,
            url,
            headers,
            body,
            streaming,
        } = request;

        info!(method = %method, url = %url, "[Request]");
        debug!(headers = ?headers, "Request headers");
        if !body.is_empty() && !is_event_stream(&headers) {
            debug!(body = %String::from_utf8_lossy(&body), "Request body");
        }

        let pending = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send();

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, pending) => match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    debug!(error = %e, "Request failed");
                    return Err(TransportError::Request(e));
                }
                Err(_) => {
                    debug!(
                        timeout_secs = RESPONSE_HEADER_TIMEOUT.as_secs(),
                        "Request failed: no response headers"
                    );
                    return Err(TransportError::Timeout(RESPONSE_HEADER_TIMEOUT));
                }
            },
        };

        let status = response.status();
        let headers = response.headers().clone();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if streaming || is_event_stream(&headers) {
            info!(status = status.as_u16(), duration_ms, "[Response] Streaming response started");
            debug!(headers = ?headers, "Response headers");
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Stream(response.bytes_stream().boxed()),
            });
        }

        info!(status = status.as_u16(), duration_ms, "[Response] Complete");
        debug!(headers = ?headers, "Response headers");

        let bytes = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            result = response.bytes() => result.map_err(TransportError::Body)?,
        };
        debug!(body = %String::from_utf8_lossy(&bytes), "Response body");

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered(bytes),
        })
    }
}

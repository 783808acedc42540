//! Per-request orchestration.
//!
//! A request moves through CORS normalization (middleware), route
//! resolution, the before-forward hooks, the upstream call, response header
//! normalization, the after-response hooks, and finally the relay.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chatgate_core::interceptor::{APPLICATION_JSON, TEXT_EVENT_STREAM};
use chatgate_core::{
    Decision, DirectResponse, GatewayConfig, InterceptedRequest, InterceptedResponse, Interceptor,
    InterceptorRegistry, ModelList, ResponseBody,
};
use futures_util::Stream;
use hyper::upgrade::OnUpgrade;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error, info, warn};

use crate::cors;
use crate::error::GatewayError;
use crate::recover::{handle_panic, spawn_guarded};
use crate::relay::{RelayError, StreamRelay};
use crate::route::{self, Route};
use crate::server::ServeError;
use crate::transport::{ByteStream, UpstreamBody, UpstreamClient, UpstreamRequest};

/// Response headers that describe the upstream connection, not the payload.
const HOP_BY_HOP_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::CONTENT_LENGTH,
];

const KEEP_ALIVE: &str = "keep-alive";
const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

#[derive(Debug)]
struct GatewayInner {
    config: GatewayConfig,
    registry: Arc<InterceptorRegistry>,
    client: UpstreamClient,
    shutdown: CancellationToken,
}

/// The gateway: immutable config, the interceptor registry and the upstream
/// client. Cloning is cheap and shares all three.
#[derive(Debug, Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Create a gateway with an empty interceptor registry.
    pub fn new(config: GatewayConfig) -> Result<Self, ServeError> {
        Self::with_registry(config, Arc::new(InterceptorRegistry::new()))
    }

    /// Create a gateway sharing an existing registry.
    pub fn with_registry(
        config: GatewayConfig,
        registry: Arc<InterceptorRegistry>,
    ) -> Result<Self, ServeError> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let client = UpstreamClient::new(shutdown.child_token())?;
        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                registry,
                client,
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<InterceptorRegistry> {
        &self.inner.registry
    }

    /// Append an interceptor; safe while serving.
    pub async fn register(&self, interceptor: Arc<dyn Interceptor>) {
        info!(interceptor = interceptor.name(), "Registered interceptor");
        self.inner.registry.register(interceptor).await;
    }

    /// Cancel in-flight upstream calls and end open streams.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// The complete HTTP surface, ready to serve or to mount in a host app.
    ///
    /// The handler needs `ConnectInfo<SocketAddr>` to populate
    /// `X-Forwarded-For`; without it the caller IP is simply not appended.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle)
            .with_state(self.clone())
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(middleware::from_fn(cors::apply_cors))
    }

    /// Route and answer one request.
    pub async fn dispatch(&self, request: Request) -> Result<Response, GatewayError> {
        match route::resolve(request.uri().path(), self.inner.config.path_prefix()) {
            Route::NotFound => {
                debug!(path = %request.uri().path(), "Path outside configured prefix");
                Err(GatewayError::NotFound)
            }
            Route::ModelList => {
                Ok(Json(ModelList::from_configured(&self.inner.config.models)).into_response())
            }
            Route::Health => Ok(Json(serde_json::json!({ "status": "ok" })).into_response()),
            Route::Forward { path } => self.forward(path, request).await,
        }
    }

    async fn forward(&self, path: String, request: Request) -> Result<Response, GatewayError> {
        let (mut parts, body) = request.into_parts();
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let upgrade = if parts.headers.contains_key(header::UPGRADE) {
            parts.extensions.remove::<OnUpgrade>()
        } else {
            None
        };

        let body = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
            error!(error = %e, "Failed to read request body");
            GatewayError::BadRequest(e.to_string())
        })?;

        let mut request = InterceptedRequest::new(parts.method, path, parts.headers, body)
            .with_query(parts.uri.query().map(str::to_string))
            .with_remote_addr(remote_addr);
        let streaming = request.is_streaming();

        info!(
            method = %request.method(),
            path = %request.path(),
            streaming,
            "Incoming request"
        );
        debug!(headers = ?request.headers(), "Request headers");
        if !request.body().is_empty() {
            debug!(body = %String::from_utf8_lossy(request.body()), "Request body");
        }

        if let Decision::DirectResponse(direct) =
            self.inner.registry.run_before_forward(&mut request).await?
        {
            info!(status = direct.status.as_u16(), "Using direct response");
            return Ok(direct_response(direct, upgrade));
        }

        let config = &self.inner.config;
        let upstream = self
            .inner
            .client
            .send(UpstreamRequest {
                method: request.method().clone(),
                url: route::upstream_url(&config.upstream_url, request.path(), request.query()),
                headers: route::forward_headers(&request, config),
                body: request.body().clone(),
                streaming,
            })
            .await?;

        let mut headers = upstream.headers;
        normalize_response_headers(&mut headers, streaming);

        let (view, stream) = match upstream.body {
            UpstreamBody::Buffered(bytes) => (ResponseBody::Buffered(bytes), None),
            UpstreamBody::Stream(stream) => (ResponseBody::Streaming, Some(stream)),
        };
        let mut response = InterceptedResponse::new(upstream.status, headers, view);
        self.inner
            .registry
            .run_after_response(&request, &mut response)
            .await;

        Ok(self.relay(response, stream, upgrade))
    }

    /// Commit the response head and hand the body to a relay.
    ///
    /// A replaced body drops the upstream stream unread.
    fn relay(
        &self,
        response: InterceptedResponse,
        stream: Option<ByteStream>,
        upgrade: Option<OnUpgrade>,
    ) -> Response {
        let InterceptedResponse {
            status,
            headers,
            body,
        } = response;

        let body = match (body, stream) {
            (ResponseBody::Buffered(bytes), _) => Body::from(bytes),
            (ResponseBody::Frames(frames), _) => relay_frames(frames, upgrade),
            (ResponseBody::Streaming, Some(stream)) => self.relay_stream(stream, upgrade),
            (ResponseBody::Streaming, None) => Body::empty(),
        };

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        out
    }

    fn relay_stream(&self, stream: ByteStream, upgrade: Option<OnUpgrade>) -> Body {
        let (relay, body) = StreamRelay::channel(upgrade);
        let shutdown = self.inner.shutdown.clone();
        spawn_guarded(async move {
            run_relay(relay, stream, shutdown).await;
        });
        body
    }
}

/// How a streamed response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayOutcome {
    Completed,
    /// The client hung up; the upstream stream was dropped.
    ClientGone,
    /// The upstream reset or closed the connection mid-stream.
    UpstreamGone,
    Failed,
    Shutdown,
}

/// Pump `stream` into `relay` until it ends, either side leaves, or the
/// gateway shuts down. Benign endings are logged at info.
async fn run_relay<S, E>(
    mut relay: StreamRelay,
    stream: S,
    shutdown: CancellationToken,
) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: StdError + Send + Sync + 'static,
{
    let result = tokio::select! {
        result = relay.pump(stream) => Some(result),
        () = shutdown.cancelled() => None,
    };

    let bytes = relay.bytes_written();
    let Some(result) = result else {
        info!(bytes, "Gateway shutting down; stream ended");
        return RelayOutcome::Shutdown;
    };
    match result {
        Ok(_) => {
            debug!(bytes, "Stream relayed");
            RelayOutcome::Completed
        }
        Err(RelayError::ClientGone) => {
            info!(bytes, "Client closed connection");
            RelayOutcome::ClientGone
        }
        Err(e) if e.is_benign() => {
            info!(bytes, reason = %e, "Upstream closed connection");
            RelayOutcome::UpstreamGone
        }
        Err(e) => {
            warn!(bytes, error = %e, "Stream relay failed");
            RelayOutcome::Failed
        }
    }
}

async fn handle(State(gateway): State<Gateway>, request: Request) -> Response {
    gateway
        .dispatch(request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// Write `frames` one at a time, each as its own body frame.
fn relay_frames(frames: Vec<Bytes>, upgrade: Option<OnUpgrade>) -> Body {
    let (mut relay, body) = StreamRelay::channel(upgrade);
    spawn_guarded(async move {
        for frame in frames {
            if relay.write(frame).await.is_err() {
                info!(bytes = relay.bytes_written(), "Client closed connection");
                return;
            }
        }
        debug!(bytes = relay.bytes_written(), "Frames relayed");
    });
    body
}

fn direct_response(direct: DirectResponse, upgrade: Option<OnUpgrade>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&direct.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(APPLICATION_JSON)),
    );

    let body = if direct.is_event_stream() {
        set_streaming_headers(&mut headers);
        relay_frames(direct.frames, upgrade)
    } else {
        Body::from(direct.body())
    };

    let mut response = Response::new(body);
    *response.status_mut() = direct.status;
    *response.headers_mut() = headers;
    response
}

/// Strip what must not be relayed and add SSE headers for streaming requests.
fn normalize_response_headers(headers: &mut HeaderMap, streaming: bool) {
    cors::strip_upstream_cors(headers);
    for name in HOP_BY_HOP_RESPONSE_HEADERS {
        headers.remove(name);
    }
    headers.remove(KEEP_ALIVE);
    if streaming {
        set_streaming_headers(headers);
    }
}

fn set_streaming_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TEXT_EVENT_STREAM),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static(KEEP_ALIVE));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
}

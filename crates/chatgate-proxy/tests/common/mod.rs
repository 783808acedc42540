//! Shared fixtures for gateway integration tests.
//!
//! `MockUpstream` is a real HTTP server on an ephemeral port that records
//! every request it receives, so tests can assert on what the gateway
//! actually forwarded.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chatgate_core::GatewayConfig;
use chatgate_proxy::{Gateway, serve};
use futures_util::{StreamExt, stream};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Default)]
struct UpstreamState {
    calls: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
    /// Streaming bodies the upstream has seen dropped.
    released: AtomicUsize,
}

/// Counts a streaming body as released when the server drops it.
struct ReleaseGuard(Arc<UpstreamState>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<UpstreamState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(UpstreamState::default());

        let app = Router::new()
            .fallback(handle_upstream)
            .with_state(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    /// Base URL with an API base path, like a real provider.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v3", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// How many streaming responses have been dropped by the server,
    /// whether finished or abandoned.
    pub fn released_streams(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Wait up to `within` for `n` streaming responses to be released.
    pub async fn wait_released(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.released_streams() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.released_streams() >= n
    }

    pub fn last_request(&self) -> Recorded {
        self.state
            .requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("upstream received no request")
    }
}

fn conflicting_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("https://upstream.example"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("x-upstream"),
    );
}

async fn handle_upstream(State(state): State<Arc<UpstreamState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let recorded = Recorded {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    };
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(recorded.clone());

    if recorded.path.ends_with("/endless") {
        return endless_stream(ReleaseGuard(Arc::clone(&state)));
    }
    if recorded.path.ends_with("/idle") {
        return idle_stream(ReleaseGuard(Arc::clone(&state)));
    }
    if !recorded.path.ends_with("/chat/completions") {
        return (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "path": recorded.path,
                "query": recorded.query,
            })),
        )
            .into_response();
    }

    let request: serde_json::Value = serde_json::from_slice(&recorded.body).unwrap_or_default();
    let model = request["model"].as_str().unwrap_or("unknown").to_string();
    let streaming = request["stream"].as_bool().unwrap_or(false);

    let mut response = if streaming {
        let chunk = |content: &str| {
            let frame = serde_json::json!({
                "id": "up-1",
                "object": "chat.completion.chunk",
                "model": model,
                "choices": [{"index": 0, "delta": {"content": content}}]
            });
            format!("data: {frame}\n\n")
        };
        let frames = vec![chunk("Hel"), chunk("lo"), "data: [DONE]\n\n".to_string()];
        let body = Body::from_stream(stream::iter(
            frames.into_iter().map(Ok::<_, std::io::Error>),
        ));
        let mut response = Response::new(body);
        // Deliberately not text/event-stream: the gateway must force it.
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        response
    } else {
        axum::Json(serde_json::json!({
            "id": "up-1",
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "from upstream"},
                "finish_reason": "stop"
            }]
        }))
        .into_response()
    };
    conflicting_cors(response.headers_mut());
    response
}

/// One SSE comment every 20ms, forever.
fn endless_stream(guard: ReleaseGuard) -> Response {
    let ticks = stream::unfold(0_u64, move |n| {
        let _held = &guard;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((Ok::<_, std::io::Error>(format!(": tick {n}\n\n")), n + 1))
        }
    });
    event_stream(Body::from_stream(ticks))
}

/// One event, then silence long enough to outlast any test.
fn idle_stream(guard: ReleaseGuard) -> Response {
    let events = stream::iter([Ok::<_, std::io::Error>("data: 0\n\n".to_string())])
        .chain(stream::once(async move {
            let _held = guard;
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok("data: [DONE]\n\n".to_string())
        }));
    event_stream(Body::from_stream(events))
}

fn event_stream(body: Body) -> Response {
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    cancel: CancellationToken,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        Self::start_with(Gateway::new(config).unwrap()).await
    }

    pub async fn start_with(gateway: Gateway) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, gateway.clone(), cancel.clone()));
        Self {
            addr,
            gateway,
            cancel,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A chat-completion request body.
pub fn chat_body(model: &str, stream: bool, last: &str) -> String {
    serde_json::json!({
        "model": model,
        "stream": stream,
        "messages": [
            {"role": "system", "content": "You are a test."},
            {"role": "user", "content": last}
        ]
    })
    .to_string()
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

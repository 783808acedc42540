//! Interceptor contract.
//!
//! An interceptor sees every forwarded request before it leaves the gateway
//! and every upstream response before its first byte reaches the client.
//!
//! Hooks communicate with the gateway through the request they are handed:
//! mutating it changes what is forwarded, attaching a [`DirectResponse`]
//! short-circuits forwarding, and attributes carry markers from a
//! before-forward hook to the matching after-response hook.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use thiserror::Error;

/// MIME type of JSON payloads.
pub const APPLICATION_JSON: &str = "application/json";
/// MIME type of Server-Sent Events streams.
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// Errors returned by interceptor hooks or configuration.
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// The options passed to `configure` were rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The request body could not be interpreted.
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// Any other hook failure.
    #[error("{0}")]
    Failed(String),
}

impl InterceptorError {
    /// Shorthand for [`InterceptorError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A response supplied by an interceptor instead of contacting the upstream.
///
/// `frames` are written to the client one at a time, each flushed on its own,
/// so an SSE payload can be delivered as individual events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub frames: Vec<Bytes>,
}

impl DirectResponse {
    /// A `200 OK` JSON payload.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: APPLICATION_JSON.to_string(),
            frames: vec![body.into()],
        }
    }

    /// A `200 OK` event stream made of the given frames.
    pub fn event_stream(frames: Vec<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: TEXT_EVENT_STREAM.to_string(),
            frames,
        }
    }

    /// Override the status code.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Whether the payload is an event stream.
    pub fn is_event_stream(&self) -> bool {
        self.content_type.starts_with(TEXT_EVENT_STREAM)
    }

    /// All frames concatenated.
    pub fn body(&self) -> Bytes {
        self.frames.concat().into()
    }
}

/// The inbound request as seen by interceptors.
///
/// The body has already been read into memory once. Every consumer gets its
/// own view of it ([`body`](Self::body) or [`body_reader`](Self::body_reader)),
/// so inspecting it never drains what is later forwarded.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    attributes: HashMap<String, serde_json::Value>,
    direct_response: Option<DirectResponse>,
}

impl InterceptedRequest {
    /// Create a request view. `path` is the path after prefix stripping.
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers,
            body,
            remote_addr: None,
            attributes: HashMap::new(),
            direct_response: None,
        }
    }

    /// Attach the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.is_empty());
        self
    }

    /// Attach the caller's socket address.
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path after prefix stripping (e.g. `/v1/chat/completions`).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The buffered body. Cloning `Bytes` is cheap and shares the buffer.
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// A fresh reader over the buffered body.
    pub fn body_reader(&self) -> impl Read + use<> {
        self.body.clone().reader()
    }

    /// Replace the body, keeping an existing `Content-Length` header in sync.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        if self.headers.contains_key(header::CONTENT_LENGTH) {
            self.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
    }

    /// Parse the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_reader(self.body_reader())
    }

    /// Whether the body is a JSON object with `"stream": true`.
    pub fn is_streaming(&self) -> bool {
        self.json::<serde_json::Value>()
            .ok()
            .and_then(|v| v.get("stream").and_then(serde_json::Value::as_bool))
            .unwrap_or(false)
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Attach a marker for later hooks.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Ask the gateway to answer with `response` instead of forwarding.
    pub fn respond_directly(&mut self, response: DirectResponse) {
        self.direct_response = Some(response);
    }

    pub const fn direct_response(&self) -> Option<&DirectResponse> {
        self.direct_response.as_ref()
    }

    pub fn take_direct_response(&mut self) -> Option<DirectResponse> {
        self.direct_response.take()
    }
}

/// Body of an upstream response as exposed to after-response hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Live upstream stream. Not inspectable; relayed untouched unless replaced.
    Streaming,
    /// Fully buffered upstream body; written as one frame.
    Buffered(Bytes),
    /// Replacement frames, each written and flushed on its own.
    Frames(Vec<Bytes>),
}

/// Upstream response head plus body handle, before anything is written downstream.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl InterceptedResponse {
    pub const fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Buffered body bytes, if the response is not streaming.
    pub fn buffered(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Replace the body with a single payload of the given content type.
    pub fn replace_body(&mut self, content_type: &str, body: impl Into<Bytes>) {
        self.set_content_type(content_type);
        self.body = ResponseBody::Buffered(body.into());
    }

    /// Replace the body with individually flushed frames.
    pub fn replace_frames(&mut self, content_type: &str, frames: Vec<Bytes>) {
        self.set_content_type(content_type);
        self.body = ResponseBody::Frames(frames);
    }

    fn set_content_type(&mut self, content_type: &str) {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(header::CONTENT_TYPE, value);
        }
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.remove(header::CONTENT_ENCODING);
    }
}

/// A pluggable unit in the gateway pipeline.
///
/// All hooks have pass-through defaults, so an implementation only overrides
/// the capabilities it needs.
#[async_trait]
pub trait Interceptor: Send + Sync + fmt::Debug {
    /// Stable identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Apply options from configuration. Called before registration.
    ///
    /// The default accepts only `null` or an empty object.
    fn configure(&mut self, options: &serde_json::Value) -> Result<(), InterceptorError> {
        match options {
            serde_json::Value::Null => Ok(()),
            serde_json::Value::Object(map) if map.is_empty() => Ok(()),
            _ => Err(InterceptorError::Config(format!(
                "{} does not take options",
                self.name()
            ))),
        }
    }

    /// Inspect or mutate the request before it is forwarded.
    async fn before_forward(
        &self,
        _request: &mut InterceptedRequest,
    ) -> Result<(), InterceptorError> {
        Ok(())
    }

    /// Inspect or rewrite the upstream response before it is relayed.
    async fn after_response(
        &self,
        _request: &InterceptedRequest,
        _response: &mut InterceptedResponse,
    ) -> Result<(), InterceptorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> InterceptedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        InterceptedRequest::new(
            Method::POST,
            "/v1/chat/completions",
            headers,
            Bytes::from(body.to_string()),
        )
    }

    #[test]
    fn test_body_is_replayable() {
        let req = request(r#"{"model":"gpt-4o"}"#);

        let mut first = String::new();
        req.body_reader().read_to_string(&mut first).unwrap();
        let mut second = String::new();
        req.body_reader().read_to_string(&mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(req.body().len(), first.len());
    }

    #[test]
    fn test_set_body_updates_content_length() {
        let mut req = request(r#"{"model":"a"}"#);
        req.set_body(r#"{"model":"much-longer"}"#);
        assert_eq!(req.header("content-length"), Some("23"));
    }

    #[test]
    fn test_set_body_without_content_length() {
        let mut req = InterceptedRequest::new(Method::POST, "/x", HeaderMap::new(), Bytes::new());
        req.set_body("abc");
        assert!(req.header("content-length").is_none());
    }

    #[test]
    fn test_is_streaming() {
        assert!(request(r#"{"stream":true}"#).is_streaming());
        assert!(!request(r#"{"stream":false}"#).is_streaming());
        assert!(!request(r#"{"stream":"yes"}"#).is_streaming());
        assert!(!request("not json").is_streaming());
        assert!(!request("").is_streaming());
    }

    #[test]
    fn test_query_empty_is_none() {
        let req = request("").with_query(Some(String::new()));
        assert_eq!(req.query(), None);
    }

    #[test]
    fn test_direct_response_round_trip() {
        let mut req = request("{}");
        assert!(req.direct_response().is_none());
        req.respond_directly(DirectResponse::json("{\"ok\":true}"));
        let resp = req.take_direct_response().unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(!resp.is_event_stream());
        assert!(req.direct_response().is_none());
    }

    #[test]
    fn test_event_stream_body_concatenates_frames() {
        let resp = DirectResponse::event_stream(vec![
            Bytes::from_static(b"data: 1\n\n"),
            Bytes::from_static(b"data: [DONE]\n\n"),
        ]);
        assert!(resp.is_event_stream());
        assert_eq!(resp.body(), Bytes::from_static(b"data: 1\n\ndata: [DONE]\n\n"));
    }

    #[test]
    fn test_replace_frames_sets_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(10));
        let mut resp = InterceptedResponse::new(StatusCode::OK, headers, ResponseBody::Streaming);

        resp.replace_frames(TEXT_EVENT_STREAM, vec![Bytes::from_static(b"data: x\n\n")]);

        assert_eq!(resp.headers[header::CONTENT_TYPE], TEXT_EVENT_STREAM);
        assert!(!resp.headers.contains_key(header::CONTENT_LENGTH));
        assert!(resp.buffered().is_none());
        assert!(matches!(resp.body, ResponseBody::Frames(ref f) if f.len() == 1));
    }

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl Interceptor for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn test_default_configure() {
        let mut noop = Noop;
        assert!(noop.configure(&serde_json::Value::Null).is_ok());
        assert!(noop.configure(&serde_json::json!({})).is_ok());
        assert!(matches!(
            noop.configure(&serde_json::json!({"level": "debug"})),
            Err(InterceptorError::Config(_))
        ));
    }
}

//! Route resolution and destination rewriting.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use chatgate_core::{GatewayConfig, InterceptedRequest};
use tracing::{debug, error, warn};
use url::Url;

/// Built-in model listing path (after prefix stripping).
pub const MODELS_PATH: &str = "/v1/models";
/// Built-in health path (after prefix stripping).
pub const HEALTH_PATH: &str = "/health";

/// Headers never forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Headers the rewrite sets itself instead of passing through.
const REWRITTEN_HEADERS: &[&str] = &[
    "origin",
    "referer",
    "authorization",
    "content-length",
    "x-forwarded-for",
];

/// Headers re-applied from the inbound request when present.
const PASSTHROUGH_HEADERS: &[HeaderName] = &[
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::USER_AGENT,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Where an inbound request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A prefix is configured and the path does not carry it.
    NotFound,
    /// `/v1/models`.
    ModelList,
    /// `/health`.
    Health,
    /// Forward upstream; `path` has the prefix stripped.
    Forward { path: String },
}

/// Resolve `path` against an optional prefix.
///
/// The prefix must match on a segment boundary: with prefix `/openai`,
/// `/openai/v1/models` matches and `/openaix/v1/models` does not.
pub fn resolve(path: &str, prefix: Option<&str>) -> Route {
    let stripped = match prefix {
        Some(prefix) => match path.strip_prefix(prefix) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => return Route::NotFound,
        },
        None => path,
    };

    match stripped {
        MODELS_PATH => Route::ModelList,
        HEALTH_PATH => Route::Health,
        _ => Route::Forward {
            path: stripped.to_string(),
        },
    }
}

/// Build the upstream URL for a forwarded path.
///
/// `/v1/...` paths lose their `/v1` and are joined onto the upstream's own
/// base path; any other path is sent as-is to the upstream host.
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let rewritten = match path.strip_prefix("/v1/") {
        Some(rest) => clean_join(base.path(), rest),
        None => path.to_string(),
    };
    debug!(from = %path, to = %rewritten, "Rewritten path");
    url.set_path(&rewritten);
    url.set_query(query);
    url
}

/// Join two paths into a single cleaned absolute path.
fn clean_join(base: &str, rest: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(rest.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn should_forward_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&lower.as_str()) && !REWRITTEN_HEADERS.contains(&lower.as_str())
}

/// Pick the credential to forward.
///
/// The caller's `Authorization` wins unless it is empty or exactly `Bearer`.
fn select_authorization<'a>(inbound: &'a HeaderMap, config: &'a GatewayConfig) -> Option<&'a str> {
    let client = inbound
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "Bearer");

    if let Some(value) = client {
        debug!("Using client Authorization token");
        return Some(value);
    }
    if let Some(value) = config.default_authorization() {
        debug!("Using configured Authorization token");
        return Some(value);
    }
    error!("No valid Authorization token available");
    None
}

/// Compute the headers sent upstream for `request`.
pub fn forward_headers(request: &InterceptedRequest, config: &GatewayConfig) -> HeaderMap {
    let inbound = request.headers();
    let mut headers = HeaderMap::with_capacity(inbound.len() + 2);

    for (name, value) in inbound {
        if should_forward_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = inbound.get(name).filter(|v| !v.is_empty()) {
            headers.insert(name.clone(), value.clone());
        }
    }
    if inbound.contains_key(header::CONTENT_LENGTH) {
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(request.body().len()),
        );
    }

    if let Some(auth) = select_authorization(inbound, config) {
        match HeaderValue::from_str(auth) {
            Ok(value) => {
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "Configured Authorization is not a valid header value"),
        }
    }

    for (name, value) in config.extra_headers() {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            warn!(header = %name, "Skipping invalid default header");
            continue;
        };
        if !headers.contains_key(&name) {
            headers.insert(name, value);
        }
    }

    if let Some(value) = forwarded_for(inbound, request.remote_addr()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    headers
}

/// Append the caller IP to any prior `X-Forwarded-For` chain.
fn forwarded_for(inbound: &HeaderMap, remote: Option<SocketAddr>) -> Option<HeaderValue> {
    let prior: Vec<&str> = inbound
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .collect();

    let chain = match (prior.is_empty(), remote) {
        (true, None) => return None,
        (true, Some(addr)) => addr.ip().to_string(),
        (false, None) => prior.join(", "),
        (false, Some(addr)) => format!("{}, {}", prior.join(", "), addr.ip()),
    };
    HeaderValue::from_str(&chain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use bytes::Bytes;

    fn config() -> GatewayConfig {
        GatewayConfig::new("https://ark.example.com/api/v3").unwrap()
    }

    fn request(headers: HeaderMap, body: &'static str) -> InterceptedRequest {
        InterceptedRequest::new(
            Method::POST,
            "/v1/chat/completions",
            headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn test_resolve_without_prefix() {
        assert_eq!(resolve("/v1/models", None), Route::ModelList);
        assert_eq!(resolve("/health", None), Route::Health);
        assert_eq!(
            resolve("/v1/chat/completions", None),
            Route::Forward {
                path: "/v1/chat/completions".into()
            }
        );
    }

    #[test]
    fn test_resolve_with_prefix() {
        let prefix = Some("/openai");
        assert_eq!(resolve("/v1/models", prefix), Route::NotFound);
        assert_eq!(resolve("/openaix/v1/models", prefix), Route::NotFound);
        assert_eq!(resolve("/openai/v1/models", prefix), Route::ModelList);
        assert_eq!(
            resolve("/openai", prefix),
            Route::Forward { path: "/".into() }
        );
        assert_eq!(
            resolve("/openai/v1/chat/completions", prefix),
            Route::Forward {
                path: "/v1/chat/completions".into()
            }
        );
    }

    #[test]
    fn test_upstream_url_strips_v1_and_joins_base() {
        let base = Url::parse("https://ark.example.com/api/v3").unwrap();
        let url = upstream_url(&base, "/v1/chat/completions", Some("a=1"));
        assert_eq!(
            url.as_str(),
            "https://ark.example.com/api/v3/chat/completions?a=1"
        );

        let trailing = Url::parse("https://ark.example.com/api/v3/").unwrap();
        let url = upstream_url(&trailing, "/v1/chat//completions/", None);
        assert_eq!(url.as_str(), "https://ark.example.com/api/v3/chat/completions");
    }

    #[test]
    fn test_upstream_url_keeps_other_paths() {
        let base = Url::parse("http://127.0.0.1:9000/api/v3").unwrap();
        let url = upstream_url(&base, "/other/thing", None);
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/other/thing");
    }

    #[test]
    fn test_upstream_url_with_root_base() {
        let base = Url::parse("http://127.0.0.1:9000").unwrap();
        let url = upstream_url(&base, "/v1/embeddings", None);
        assert_eq!(url.path(), "/embeddings");
    }

    #[test]
    fn test_client_authorization_wins() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        let config = config().with_bearer_token("default");

        let headers = forward_headers(&request(inbound, "{}"), &config);
        assert_eq!(headers[header::AUTHORIZATION], "Bearer client");
    }

    #[test]
    fn test_bare_bearer_falls_back_to_default() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        let config = config().with_bearer_token("default");

        let headers = forward_headers(&request(inbound, "{}"), &config);
        assert_eq!(headers[header::AUTHORIZATION], "Bearer default");
    }

    #[test]
    fn test_missing_authorization_is_not_fatal() {
        let headers = forward_headers(&request(HeaderMap::new(), "{}"), &config());
        assert!(!headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_origin_referer_and_hop_by_hop_removed() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::ORIGIN, HeaderValue::from_static("https://app.example"));
        inbound.insert(header::REFERER, HeaderValue::from_static("https://app.example/x"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:8899"));
        inbound.insert(header::USER_AGENT, HeaderValue::from_static("cursor/1.0"));
        inbound.insert("x-request-id", HeaderValue::from_static("abc"));

        let headers = forward_headers(&request(inbound, "{}"), &config());

        assert!(!headers.contains_key(header::ORIGIN));
        assert!(!headers.contains_key(header::REFERER));
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key(header::HOST));
        assert_eq!(headers[header::USER_AGENT], "cursor/1.0");
        assert_eq!(headers["x-request-id"], "abc");
    }

    #[test]
    fn test_content_length_tracks_body() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from(999));

        let headers = forward_headers(&request(inbound, r#"{"a":1}"#), &config());
        assert_eq!(headers[header::CONTENT_LENGTH], "7");

        let headers = forward_headers(&request(HeaderMap::new(), r#"{"a":1}"#), &config());
        assert!(!headers.contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn test_default_headers_added_when_absent() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-team", HeaderValue::from_static("client"));
        let config = config()
            .with_header("X-Team", "default")
            .with_header("X-Region", "cn-beijing");

        let headers = forward_headers(&request(inbound, "{}"), &config);
        assert_eq!(headers["x-team"], "client");
        assert_eq!(headers["x-region"], "cn-beijing");
    }

    #[test]
    fn test_forwarded_for_appends_caller() {
        let addr: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert(X_FORWARDED_FOR, HeaderValue::from_static("1.2.3.4"));

        let req = request(inbound, "{}").with_remote_addr(Some(addr));
        let headers = forward_headers(&req, &config());
        assert_eq!(headers[X_FORWARDED_FOR], "1.2.3.4, 10.0.0.7");

        let req = request(HeaderMap::new(), "{}").with_remote_addr(Some(addr));
        let headers = forward_headers(&req, &config());
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.7");
    }
}

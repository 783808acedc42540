//! CORS normalization.
//!
//! Every response leaves the gateway with exactly one copy of each
//! gateway-owned CORS header, whatever the upstream sent. Preflight requests
//! are answered here and never reach routing.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "POST, GET, OPTIONS, PUT, DELETE";
const ALLOW_HEADERS: &str = concat!(
    "Content-Type, Content-Length, Accept-Encoding, Authorization, accept, origin, ",
    "Cache-Control, X-Requested-With, baggage, sentry-trace"
);
const ALLOW_CREDENTIALS: &str = "true";

/// CORS headers an upstream may send that the gateway never relays.
const UPSTREAM_CORS_HEADERS: &[header::HeaderName] = &[
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
    header::ACCESS_CONTROL_MAX_AGE,
    header::ACCESS_CONTROL_EXPOSE_HEADERS,
    header::ACCESS_CONTROL_REQUEST_METHOD,
];

/// Middleware applying the gateway's CORS policy.
///
/// `OPTIONS` short-circuits with `204 No Content`.
pub async fn apply_cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        set_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    strip_upstream_cors(response.headers_mut());
    set_cors_headers(response.headers_mut());
    response
}

/// Remove every upstream-supplied `Access-Control-*` header the gateway owns.
pub fn strip_upstream_cors(headers: &mut HeaderMap) {
    for name in UPSTREAM_CORS_HEADERS {
        headers.remove(name);
    }
}

fn set_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static(ALLOW_CREDENTIALS),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    async fn noisy_upstream() -> Response {
        let mut response = "ok".into_response();
        let headers = response.headers_mut();
        headers.append(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://upstream.example"),
        );
        headers.append(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://other.example"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        response
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(noisy_upstream))
            .layer(middleware::from_fn(apply_cors))
    }

    #[tokio::test]
    async fn test_preflight_returns_no_content() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            ALLOW_METHODS
        );
    }

    #[tokio::test]
    async fn test_upstream_cors_replaced_exactly_once() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        let origins: Vec<_> = headers
            .get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .iter()
            .collect();
        assert_eq!(origins, vec!["*"]);
        assert_eq!(
            headers.get_all(header::ACCESS_CONTROL_ALLOW_HEADERS).iter().count(),
            1
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_MAX_AGE));
    }
}

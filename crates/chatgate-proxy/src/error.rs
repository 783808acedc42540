//! Gateway error type and its HTTP mapping.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chatgate_core::PipelineError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::transport::{ErrorClass, TransportError};

/// Per-request failure, already classified.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A prefix is configured and the path does not carry it.
    #[error("Not found")]
    NotFound,

    /// The inbound body could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// A before-forward hook failed.
    #[error(transparent)]
    Interceptor(#[from] PipelineError),

    /// The upstream call failed.
    #[error("{0}")]
    Upstream(TransportError),

    /// The client or the gateway went away; nothing to report.
    #[error("connection closed")]
    Disconnected,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err.class() {
            ErrorClass::Benign => {
                info!(reason = %err, "Client closed connection");
                Self::Disconnected
            }
            ErrorClass::Upstream => {
                error!(error = %err, "Proxy error");
                Self::Upstream(err)
            }
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::BadRequest(message) => json_error(StatusCode::BAD_REQUEST, message),
            Self::Interceptor(err) => {
                error!(interceptor = %err.interceptor, error = %err, "Plugin error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Upstream(err) => (
                StatusCode::BAD_GATEWAY,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("Proxy Error: {err}"),
            )
                .into_response(),
            Self::Disconnected => StatusCode::OK.into_response(),
            Self::Internal(message) => json_error(StatusCode::INTERNAL_SERVER_ERROR, message),
        }
    }
}
